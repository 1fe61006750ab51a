//! The two command flows: run (or resume) an audit, and derive a summary
//! report from a raw audit without touching the network.
//!
//! Both take an already-built config; the binary owns argument parsing,
//! password prompting and login.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::accounts::{Account, AdminIdentity, Administrator};
use crate::config::{AuditConfig, Environment};
use crate::directory::AccountDirectory;
use crate::enrich::{enrich_last_uploads, enrich_profiles, EnrichmentOptions, EnrichmentSummary};
use crate::error::{AuditError, AuditResult};
use crate::report::{self, Destination};

#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub env: Environment,
    /// Existing raw audit to re-run instead of discovering accounts.
    pub resume_from: Option<PathBuf>,
}

#[derive(Debug)]
pub struct AuditRunReport {
    pub accounts: usize,
    /// `None` when resumed: profiles come from the artifact.
    pub profiles: Option<EnrichmentSummary>,
    pub uploads: EnrichmentSummary,
    pub written: Vec<PathBuf>,
    pub failed_blocks: Vec<AuditError>,
}

/// Run a fresh or resumed audit for an authenticated administrator.
///
/// Fails only when the registry cannot be built (listing transport failure,
/// unreadable artifact) or when no block at all could be written. Per-account
/// enrichment problems and individual block failures end up in the report.
pub async fn run_audit(
    directory: Arc<dyn AccountDirectory>,
    identity: AdminIdentity,
    config: &AuditConfig,
    request: &AuditRequest,
) -> AuditResult<AuditRunReport> {
    let options = EnrichmentOptions::from_config(config);

    let (mut admin, profiles, destination) = match &request.resume_from {
        Some(path) => {
            log::info!("re-running audit on accounts ...");
            let mut admin = report::reload(path)?;
            if admin.identity.is_empty() {
                admin.identity = identity;
            }
            (admin, None, Destination::InPlace(path.clone()))
        }
        None => {
            log::info!("finding administered accounts ...");
            let mut admin = Administrator::new(identity);
            for discovered in directory
                .list_accessible_accounts(&admin.identity.id)
                .await?
            {
                admin
                    .accounts
                    .push(Account::new(discovered.id, discovered.permissions));
            }

            log::info!("fetching profiles ... {} accounts", admin.accounts.len());
            let summary =
                enrich_profiles(Arc::clone(&directory), &mut admin.accounts, &options).await;
            summary.log();
            (
                admin,
                Some(summary),
                Destination::Directory(config.output_dir.clone()),
            )
        }
    };

    log::info!("running audit on {} accounts ...", admin.accounts.len());
    let start = Instant::now();
    let uploads = enrich_last_uploads(directory, &mut admin.accounts, &options).await;
    uploads.log();
    log::info!("audit took [{:.3}]secs", start.elapsed().as_secs_f64());

    let writes = report::write_raw_audit(
        &admin,
        request.env,
        &destination,
        config.block_size,
        Utc::now(),
    );

    let mut written = Vec::new();
    let mut failed_blocks = Vec::new();
    for write in writes {
        match write.result {
            Ok(path) => written.push(path),
            Err(e) => failed_blocks.push(e),
        }
    }

    if written.is_empty() {
        return Err(match failed_blocks.into_iter().next() {
            Some(first) => first,
            None => AuditError::persistence(
                config.output_dir.clone(),
                "no audit blocks were produced",
            ),
        });
    }

    Ok(AuditRunReport {
        accounts: admin.accounts.len(),
        profiles,
        uploads,
        written,
        failed_blocks,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRunReport {
    pub accounts_in_audit: usize,
    pub reported: usize,
    pub path: PathBuf,
}

/// Build the summary report for a raw audit: accounts sorted by name,
/// optionally limited to those with a recorded upload.
pub fn prepare_audit_report(raw_path: &Path, uploads_only: bool) -> AuditResult<SummaryRunReport> {
    let admin = report::reload(raw_path)?;

    let view = if uploads_only {
        admin.accounts.filter_has_uploads().sort_by_name()
    } else {
        admin.accounts.sort_by_name()
    };
    let basics = view.to_basic_projection();
    if uploads_only {
        log::info!("accounts w uploads {}", basics.len());
    } else {
        log::info!("accounts in report {}", basics.len());
    }

    let path = report::write_summary_report(&basics, raw_path)?;
    Ok(SummaryRunReport {
        accounts_in_audit: admin.accounts.len(),
        reported: basics.len(),
        path,
    })
}
