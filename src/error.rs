//! Error types for an audit run
//!
//! Errors are classified by how far they propagate:
//! - Fatal: authentication, directory listing, configuration, unreadable artifacts
//! - Recoverable: per-account enrichment failures, per-file write failures

use std::path::PathBuf;
use thiserror::Error;

/// Error types for an audit run
#[derive(Debug, Error)]
pub enum AuditError {
    // Fatal for the whole run
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Listing administered accounts failed: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Fatal for the reload path only
    #[error("Malformed audit artifact {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    // Recoverable
    #[error("Enrichment failed for account {account_id}: {reason}")]
    Enrichment { account_id: String, reason: String },

    #[error("Could not persist {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    /// Returns true if this error aborts the run (or the reload path)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::Authentication(_)
                | AuditError::Directory(_)
                | AuditError::Configuration(_)
                | AuditError::Format { .. }
        )
    }

    /// Returns true if this error is a transient transport failure
    pub fn is_retryable(&self) -> bool {
        match self {
            AuditError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().is_some_and(|s| is_retryable_status(s.as_u16()))
            }
            _ => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AuditError::Authentication(_) => "Check the username, password and target environment.",
            AuditError::Directory(_) => "Check your connection to the environment and try again.",
            AuditError::Configuration(_) => {
                "Check the environment name and ~/.accounts-audit/config.json"
            }
            AuditError::Format { .. } => "Point --reportpath at a raw audit file this tool wrote.",
            AuditError::Enrichment { .. } => "Re-run the audit with --reportpath to fill the gaps.",
            AuditError::Persistence { .. } => "Check file permissions and disk space.",
            AuditError::Http(_) => "Check your internet connection and try again.",
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AuditError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AuditError::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// 408, 429 and 5xx are worth another attempt.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}
