//! In-memory directory for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{AccountDirectory, DiscoveredAccount};
use crate::accounts::Profile;
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone)]
pub enum Behavior {
    Answer(String),
    NotFound,
    Transport,
    Hang,
    Panic,
}

#[derive(Default)]
pub struct FakeDirectory {
    pub accounts: Vec<DiscoveredAccount>,
    pub list_fails: bool,
    pub profiles: HashMap<String, Behavior>,
    pub uploads: HashMap<String, Behavior>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_account(mut self, id: &str, name: Behavior, upload: Behavior) -> Self {
        self.accounts.push(DiscoveredAccount {
            id: id.to_string(),
            permissions: serde_json::json!({ "view": {} }),
        });
        self.profiles.insert(id.to_string(), name);
        self.uploads.insert(id.to_string(), upload);
        self
    }

    async fn answer(
        &self,
        table: &HashMap<String, Behavior>,
        account_id: &str,
    ) -> AuditResult<Option<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match table.get(account_id).cloned().unwrap_or(Behavior::NotFound) {
            Behavior::Answer(value) => Ok(Some(value)),
            Behavior::NotFound => Ok(None),
            Behavior::Transport => Err(AuditError::Enrichment {
                account_id: account_id.to_string(),
                reason: "connection reset".to_string(),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            Behavior::Panic => panic!("fake directory blew up"),
        }
    }
}

pub fn answer(value: &str) -> Behavior {
    Behavior::Answer(value.to_string())
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn list_accessible_accounts(
        &self,
        _admin_id: &str,
    ) -> AuditResult<Vec<DiscoveredAccount>> {
        if self.list_fails {
            return Err(AuditError::Directory("connection refused".to_string()));
        }
        Ok(self.accounts.clone())
    }

    async fn fetch_profile(&self, account_id: &str) -> AuditResult<Option<Profile>> {
        Ok(self
            .answer(&self.profiles, account_id)
            .await?
            .map(|full_name| Profile {
                full_name,
                patient: None,
            }))
    }

    async fn fetch_last_upload(&self, account_id: &str) -> AuditResult<Option<String>> {
        self.answer(&self.uploads, account_id).await
    }
}
