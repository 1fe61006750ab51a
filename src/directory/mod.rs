//! Remote account directory.
//!
//! The directory authenticates administrators, lists the accounts they can
//! access, and serves per-account profile and last-upload data.
//!
//! Modules:
//! - session: reqwest-backed `Session` implementing `AccountDirectory`

pub mod session;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::accounts::Profile;
use crate::error::{is_retryable_status, AuditError, AuditResult};

pub use session::Session;

/// Header carrying the session credential on every request after login.
pub const SESSION_TOKEN_HEADER: &str = "x-tidepool-session-token";

/// An account id returned by the directory listing, with its raw permission
/// descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredAccount {
    pub id: String,
    pub permissions: serde_json::Value,
}

/// Read operations against the directory, shared by every enrichment task.
///
/// `Ok(None)` (or an empty list) means the directory answered with a
/// non-success status; the implementation has already logged it. `Err` means
/// the request never produced a usable response.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn list_accessible_accounts(&self, admin_id: &str)
        -> AuditResult<Vec<DiscoveredAccount>>;

    async fn fetch_profile(&self, account_id: &str) -> AuditResult<Option<Profile>>;

    async fn fetch_last_upload(&self, account_id: &str) -> AuditResult<Option<String>>;
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Longest `Retry-After` the directory is allowed to impose.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Seconds from a numeric `Retry-After` header, capped.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let secs: u64 = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Backoff before the retry that follows failed attempt `attempt` (1-based):
/// doubles from `initial_backoff_ms` up to `max_backoff_ms`, plus up to
/// 150ms of clock-derived jitter so parallel tasks spread out.
fn backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let ms = policy
        .initial_backoff_ms
        .saturating_mul(1 << doublings)
        .min(policy.max_backoff_ms);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::from(d.subsec_nanos()) % 150);
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Send a request, retrying transient failures (`AuditError::is_retryable`
/// transport errors and 408/429/5xx statuses) up to `policy.max_attempts`.
///
/// The final response is returned whatever its status; callers decide what
/// a non-success status means for them. Retries log at debug level only so
/// each failed account still gets a single warning from its caller.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> AuditResult<reqwest::Response> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(AuditError::Http);
        };
        let last_try = attempt >= max_attempts;

        let delay = match cloned.send().await {
            Ok(response) if !last_try && is_retryable_status(response.status().as_u16()) => {
                let delay = retry_after(response.headers()).unwrap_or_else(|| backoff(attempt, policy));
                log::debug!(
                    "{} answered {}, attempt {} of {}; waiting {:?}",
                    response.url().path(),
                    response.status().as_u16(),
                    attempt,
                    max_attempts,
                    delay
                );
                delay
            }
            Ok(response) => return Ok(response),
            Err(err) => {
                let err = AuditError::Http(err);
                if last_try || !err.is_retryable() {
                    return Err(err);
                }
                let delay = backoff(attempt, policy);
                log::debug!(
                    "transport error on attempt {} of {}: {}; waiting {:?}",
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                delay
            }
        };
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
