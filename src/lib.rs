//! Administrative account auditing against a remote account directory.
//!
//! An administrator logs in, every account they can access is discovered and
//! enriched with profile and last-upload data, and the result is written as a
//! raw audit. Summary reports are derived later from that raw audit, offline.

pub mod accounts;
pub mod commands;
pub mod config;
pub mod directory;
pub mod enrich;
pub mod error;
pub mod report;
pub mod util;

pub use accounts::{AccountRegistry, AdminIdentity, Administrator};
pub use commands::{prepare_audit_report, run_audit, AuditRequest};
pub use config::{load_config, AuditConfig, Environment};
pub use directory::{AccountDirectory, Session};
pub use error::{AuditError, AuditResult};
