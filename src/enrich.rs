//! Concurrent per-account enrichment.
//!
//! One task per account per pass. Tasks only fetch: each returns its result
//! keyed by the account's position, and the registry is written after every
//! task has finished. A slow account is cut off by the fetch timeout, and a
//! failing or panicking task only costs its own account.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::accounts::{AccountRegistry, Profile};
use crate::config::AuditConfig;
use crate::directory::AccountDirectory;
use crate::error::AuditResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentOptions {
    /// Upper bound on a single account's fetch, retries included.
    pub timeout: Duration,
    /// Concurrent task cap. `None` runs every task at once.
    pub max_in_flight: Option<usize>,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_in_flight: None,
        }
    }
}

impl EnrichmentOptions {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_in_flight: config.max_in_flight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentPass {
    Profile,
    LastUpload,
}

impl EnrichmentPass {
    fn label(&self) -> &'static str {
        match self {
            EnrichmentPass::Profile => "profile",
            EnrichmentPass::LastUpload => "last upload",
        }
    }
}

/// What happened to one account during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// The directory returned a value and it was recorded.
    Updated,
    /// Non-success status or an empty value; the field was left as it was.
    Unavailable,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountOutcome {
    pub account_id: String,
    pub outcome: EnrichmentOutcome,
}

#[derive(Debug, Clone)]
pub struct EnrichmentSummary {
    pub pass: EnrichmentPass,
    pub outcomes: Vec<AccountOutcome>,
    pub elapsed: Duration,
}

impl EnrichmentSummary {
    fn count(&self, pred: impl Fn(&EnrichmentOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| *o == EnrichmentOutcome::Updated)
    }

    pub fn unavailable(&self) -> usize {
        self.count(|o| *o == EnrichmentOutcome::Unavailable)
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| *o == EnrichmentOutcome::TimedOut)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EnrichmentOutcome::Failed(_)))
    }

    /// Accounts that timed out or failed.
    pub fn failures(&self) -> impl Iterator<Item = &AccountOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                o.outcome,
                EnrichmentOutcome::TimedOut | EnrichmentOutcome::Failed(_)
            )
        })
    }

    pub fn log(&self) {
        log::info!(
            "{} pass over {} accounts took [{:.3}]secs: {} updated, {} unavailable, {} timed out, {} failed",
            self.pass.label(),
            self.outcomes.len(),
            self.elapsed.as_secs_f64(),
            self.updated(),
            self.unavailable(),
            self.timed_out(),
            self.failed()
        );
    }
}

enum Fetched {
    Profile(Option<Profile>),
    LastUpload(Option<String>),
}

enum TaskResult {
    Fetched(Fetched),
    TimedOut,
    Failed(String),
}

/// Fill in every account's profile.
pub async fn enrich_profiles(
    directory: Arc<dyn AccountDirectory>,
    registry: &mut AccountRegistry,
    options: &EnrichmentOptions,
) -> EnrichmentSummary {
    run_pass(directory, registry, options, EnrichmentPass::Profile).await
}

/// Fill in every account's last upload marker.
pub async fn enrich_last_uploads(
    directory: Arc<dyn AccountDirectory>,
    registry: &mut AccountRegistry,
    options: &EnrichmentOptions,
) -> EnrichmentSummary {
    run_pass(directory, registry, options, EnrichmentPass::LastUpload).await
}

async fn fetch(
    directory: &dyn AccountDirectory,
    pass: EnrichmentPass,
    account_id: &str,
) -> AuditResult<Fetched> {
    match pass {
        EnrichmentPass::Profile => directory.fetch_profile(account_id).await.map(Fetched::Profile),
        EnrichmentPass::LastUpload => directory
            .fetch_last_upload(account_id)
            .await
            .map(Fetched::LastUpload),
    }
}

async fn run_pass(
    directory: Arc<dyn AccountDirectory>,
    registry: &mut AccountRegistry,
    options: &EnrichmentOptions,
    pass: EnrichmentPass,
) -> EnrichmentSummary {
    let start = Instant::now();
    let limiter = options.max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let handles: Vec<_> = registry
        .iter()
        .map(|account| {
            let account_id = account.id().to_string();
            let task_id = account_id.clone();
            let directory = Arc::clone(&directory);
            let limiter = limiter.clone();
            let timeout = options.timeout;

            let handle = tokio::spawn(async move {
                let _permit = match limiter {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return TaskResult::Failed(e.to_string()),
                    },
                    None => None,
                };
                match tokio::time::timeout(timeout, fetch(directory.as_ref(), pass, &task_id)).await
                {
                    Ok(Ok(fetched)) => TaskResult::Fetched(fetched),
                    Ok(Err(e)) => TaskResult::Failed(e.to_string()),
                    Err(_) => TaskResult::TimedOut,
                }
            });
            (account_id, handle)
        })
        .collect();

    // Join barrier: nothing is applied until every task is done.
    let mut results = Vec::with_capacity(handles.len());
    for (account_id, handle) in handles {
        let result = handle
            .await
            .unwrap_or_else(|e| TaskResult::Failed(format!("enrichment task aborted: {}", e)));
        results.push((account_id, result));
    }

    let mut outcomes = Vec::with_capacity(results.len());
    for (index, (account_id, result)) in results.into_iter().enumerate() {
        let outcome = match registry.get_mut(index) {
            Some(account) if account.id() == account_id => match result {
                TaskResult::Fetched(Fetched::Profile(Some(profile))) => {
                    account.profile = profile;
                    EnrichmentOutcome::Updated
                }
                TaskResult::Fetched(Fetched::LastUpload(Some(value))) if !value.is_empty() => {
                    account.record_last_upload(value);
                    EnrichmentOutcome::Updated
                }
                TaskResult::Fetched(_) => EnrichmentOutcome::Unavailable,
                TaskResult::TimedOut => {
                    log::warn!(
                        "Timed out after {:?} fetching {} for [{}]",
                        options.timeout,
                        pass.label(),
                        account_id
                    );
                    EnrichmentOutcome::TimedOut
                }
                TaskResult::Failed(reason) => {
                    log::warn!(
                        "Failed fetching {} for [{}]: {}",
                        pass.label(),
                        account_id,
                        reason
                    );
                    EnrichmentOutcome::Failed(reason)
                }
            },
            _ => EnrichmentOutcome::Failed("account moved during enrichment".to_string()),
        };
        outcomes.push(AccountOutcome {
            account_id,
            outcome,
        });
    }

    EnrichmentSummary {
        pass,
        outcomes,
        elapsed: start.elapsed(),
    }
}
