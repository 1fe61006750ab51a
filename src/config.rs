//! Run configuration.
//!
//! Built once in `main` and passed down by reference. An optional JSON file
//! (`--config PATH`, else `~/.accounts-audit/config.json`) can override the
//! environment table and the tuning knobs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::directory::RetryPolicy;
use crate::error::{AuditError, AuditResult};

/// Deployment targets an audit can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Devel,
    Staging,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Local,
        Environment::Devel,
        Environment::Staging,
        Environment::Prod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Devel => "devel",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    /// Built-in base address for this environment.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Environment::Local => "http://localhost:8009",
            Environment::Devel => "https://devel-api.tidepool.io",
            Environment::Staging => "https://staging-api.tidepool.io",
            Environment::Prod => "https://api.tidepool.io",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == wanted)
            .ok_or_else(|| {
                AuditError::Configuration(format!(
                    "no matching environment '{}'. Options are local, devel, staging and prod",
                    s
                ))
            })
    }
}

/// Audit configuration stored in ~/.accounts-audit/config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Per-environment base URL overrides, keyed by environment name
    /// (case-insensitive).
    #[serde(default)]
    pub environments: HashMap<String, String>,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Cap on concurrent enrichment tasks. `None` launches every task at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_block_size() -> usize {
    200
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            environments: HashMap::new(),
            block_size: default_block_size(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_in_flight: None,
            retry: RetryPolicy::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl AuditConfig {
    /// Resolve the base URL for `env`, preferring a configured override.
    pub fn base_url(&self, env: Environment) -> AuditResult<Url> {
        let raw = self
            .environments
            .iter()
            .find(|(name, _)| name.parse::<Environment>().ok() == Some(env))
            .map(|(_, url)| url.as_str())
            .unwrap_or_else(|| env.default_base_url());
        Url::parse(raw).map_err(|e| {
            AuditError::Configuration(format!("invalid base URL '{}' for {}: {}", raw, env, e))
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    fn validate(self) -> AuditResult<Self> {
        if self.block_size == 0 {
            return Err(AuditError::Configuration(
                "blockSize must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(AuditError::Configuration(
                "maxInFlight must be at least 1 when set".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in self.environments.keys() {
            let env = name.parse::<Environment>()?;
            if !seen.insert(env) {
                return Err(AuditError::Configuration(format!(
                    "environment '{}' is overridden more than once",
                    env
                )));
            }
        }
        Ok(self)
    }
}

/// Default config location.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".accounts-audit").join("config.json"))
}

/// Load configuration.
///
/// Resolution order:
/// 1. explicit path (must exist)
/// 2. ~/.accounts-audit/config.json (if present)
/// 3. built-in defaults
pub fn load_config(explicit: Option<&Path>) -> AuditResult<AuditConfig> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    match config_path() {
        Some(path) if path.exists() => read_config(&path),
        _ => Ok(AuditConfig::default()),
    }
}

fn read_config(path: &Path) -> AuditResult<AuditConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AuditError::Configuration(format!("failed to read {}: {}", path.display(), e))
    })?;
    let config: AuditConfig = serde_json::from_str(&content).map_err(|e| {
        AuditError::Configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;
    log::debug!("loaded config from {}", path.display());
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse_is_case_insensitive() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" devel ".parse::<Environment>().unwrap(), Environment::Devel);
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Local);
    }

    #[test]
    fn test_unknown_environment_is_configuration_error() {
        let err = "qa".parse::<Environment>().unwrap_err();
        assert!(matches!(err, AuditError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_base_url_builtin_and_override() {
        let mut config = AuditConfig::default();
        assert_eq!(
            config.base_url(Environment::Staging).unwrap().as_str(),
            "https://staging-api.tidepool.io/"
        );

        config
            .environments
            .insert("local".to_string(), "http://127.0.0.1:9000".to_string());
        assert_eq!(
            config.base_url(Environment::Local).unwrap().as_str(),
            "http://127.0.0.1:9000/"
        );
    }

    #[test]
    fn test_override_key_matches_any_case() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "environments": { "Prod": "http://127.0.0.1:9999", " STAGING ": "http://127.0.0.1:9998" } }"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(
            config.base_url(Environment::Prod).unwrap().as_str(),
            "http://127.0.0.1:9999/"
        );
        assert_eq!(
            config.base_url(Environment::Staging).unwrap().as_str(),
            "http://127.0.0.1:9998/"
        );
        assert_eq!(
            config.base_url(Environment::Devel).unwrap().as_str(),
            "https://devel-api.tidepool.io/"
        );
    }

    #[test]
    fn test_same_environment_overridden_twice_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "environments": { "prod": "http://a", "PROD": "http://b" } }"#,
        )
        .unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(AuditError::Configuration(_))
        ));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "blockSize": 50, "maxInFlight": 8 }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.block_size, 50);
        assert_eq!(config.max_in_flight, Some(8));
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_invalid_config_values_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");

        let zero_block = dir.path().join("zero.json");
        std::fs::write(&zero_block, r#"{ "blockSize": 0 }"#).unwrap();
        assert!(matches!(
            load_config(Some(&zero_block)),
            Err(AuditError::Configuration(_))
        ));

        let bad_env = dir.path().join("env.json");
        std::fs::write(&bad_env, r#"{ "environments": { "qa": "http://qa" } }"#).unwrap();
        assert!(matches!(
            load_config(Some(&bad_env)),
            Err(AuditError::Configuration(_))
        ));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        assert!(matches!(
            load_config(Some(&garbage)),
            Err(AuditError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_config(Some(&dir.path().join("nope.json"))).is_err());
    }
}
