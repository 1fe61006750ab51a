//! HTTP session against the account directory.
//!
//! Login is `POST /auth/login` with Basic credentials; the session credential
//! comes back in the `x-tidepool-session-token` header and is sent on every
//! later request. One `reqwest::Client` is reused for the whole run and shared
//! across enrichment tasks behind an `Arc`.

use async_trait::async_trait;
use url::Url;

use super::{send_with_retry, AccountDirectory, DiscoveredAccount, RetryPolicy, SESSION_TOKEN_HEADER};
use crate::accounts::{AdminIdentity, Profile};
use crate::config::{AuditConfig, Environment};
use crate::error::{AuditError, AuditResult};

pub struct Session {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    credential: Option<String>,
    identity: Option<AdminIdentity>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.credential.is_some())
            .field("identity", &self.identity)
            .finish()
    }
}

impl Session {
    pub fn new(base_url: Url, retry: RetryPolicy) -> AuditResult<Self> {
        let mut base_url = base_url;
        if base_url.cannot_be_a_base() {
            return Err(AuditError::Configuration(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("accounts-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            retry,
            credential: None,
            identity: None,
        })
    }

    pub fn from_config(config: &AuditConfig, env: Environment) -> AuditResult<Self> {
        Self::new(config.base_url(env)?, config.retry.clone())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn identity(&self) -> Option<&AdminIdentity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// Log in once. Any non-200 answer, transport failure, or missing
    /// session header is an `Authentication` error. Never retried.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> AuditResult<AdminIdentity> {
        let url = self.endpoint(&["auth", "login"])?;

        let resp = self
            .client
            .post(url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| AuditError::Authentication(format!("login request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuditError::Authentication(format!(
                "login failed with status {}",
                status.as_u16()
            )));
        }

        let token = resp
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuditError::Authentication("login response carried no session token".to_string())
            })?;

        let identity: AdminIdentity = resp
            .json()
            .await
            .map_err(|e| AuditError::Authentication(format!("unreadable login response: {}", e)))?;

        log::info!("Logged in as [{}]", identity.name);
        self.credential = Some(token);
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Base URL plus percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> AuditResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AuditError::Configuration(format!("base URL '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized_get(&self, url: Url) -> AuditResult<reqwest::RequestBuilder> {
        let token = self
            .credential
            .as_deref()
            .ok_or_else(|| AuditError::Authentication("session is not authenticated".to_string()))?;
        Ok(self.client.get(url).header(SESSION_TOKEN_HEADER, token))
    }
}

fn enrichment_error(account_id: &str, reason: impl ToString) -> AuditError {
    AuditError::Enrichment {
        account_id: account_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Last-upload bodies are a JSON string in practice. `null` or an empty body
/// means no upload; any other value is kept in its JSON text form.
pub(crate) fn decode_last_upload(body: &str) -> Result<String, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }
    let value: serde_json::Value = serde_json::from_str(body)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[async_trait]
impl AccountDirectory for Session {
    async fn list_accessible_accounts(
        &self,
        admin_id: &str,
    ) -> AuditResult<Vec<DiscoveredAccount>> {
        let url = self.endpoint(&["access", "groups", admin_id])?;
        let resp = send_with_retry(self.authorized_get(url)?, &self.retry)
            .await
            .map_err(|e| AuditError::Directory(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            log::warn!("Failed finding administered accounts [{}]", status.as_u16());
            return Ok(Vec::new());
        }

        let groups: serde_json::Map<String, serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| AuditError::Directory(format!("unreadable account listing: {}", e)))?;

        Ok(groups
            .into_iter()
            .map(|(id, permissions)| DiscoveredAccount { id, permissions })
            .collect())
    }

    async fn fetch_profile(&self, account_id: &str) -> AuditResult<Option<Profile>> {
        let url = self.endpoint(&["metadata", account_id, "profile"])?;
        let resp = send_with_retry(self.authorized_get(url)?, &self.retry)
            .await
            .map_err(|e| enrichment_error(account_id, e))?;

        let status = resp.status();
        if !status.is_success() {
            log::warn!(
                "Failed finding public info [{}] for [{}]",
                status.as_u16(),
                account_id
            );
            return Ok(None);
        }

        let profile: Profile = resp
            .json()
            .await
            .map_err(|e| enrichment_error(account_id, format!("unreadable profile: {}", e)))?;
        Ok(Some(profile))
    }

    async fn fetch_last_upload(&self, account_id: &str) -> AuditResult<Option<String>> {
        let url = self.endpoint(&["query", "upload", "lastentry", account_id])?;
        let resp = send_with_retry(self.authorized_get(url)?, &self.retry)
            .await
            .map_err(|e| enrichment_error(account_id, e))?;

        let status = resp.status();
        if !status.is_success() {
            log::warn!(
                "Failed finding last upload info [{}] for [{}]",
                status.as_u16(),
                account_id
            );
            return Ok(None);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| enrichment_error(account_id, e))?;
        decode_last_upload(&body)
            .map(Some)
            .map_err(|e| enrichment_error(account_id, format!("unreadable last upload: {}", e)))
    }
}
