//! Raw audit and summary report files.
//!
//! A raw audit is the administrator record as indented JSON. Registries
//! larger than the block size are split into several files so no single file
//! grows unbounded:
//!   audit_{admin}_accounts_{env}_{timestamp}.txt
//!   audit_{admin}_accounts_{env}_part-{i}_{timestamp}.txt
//! Summary reports sit next to the raw file with a `report_` prefix.
//!
//! Every write is atomic, and each block's write stands alone: a failure on
//! one block is reported without touching blocks already written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::accounts::{Account, AccountBasics, AccountView, AdminIdentity, Administrator};
use crate::config::Environment;
use crate::error::{AuditError, AuditResult};
use crate::util::{atomic_write_str, sanitize_file_component};

/// Split `items` into contiguous blocks of at most `block_size`, preserving
/// order. A registry that fits in one block (including an empty one) yields
/// exactly one block.
pub fn partition<T>(items: &[T], block_size: usize) -> Vec<&[T]> {
    let block_size = block_size.max(1);
    if items.len() <= block_size {
        return vec![items];
    }
    items.chunks(block_size).collect()
}

/// Where a raw audit goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Fresh, timestamped file(s) in this directory.
    Directory(PathBuf),
    /// Rewrite this artifact when the registry fits in one block; otherwise
    /// fresh block files are written next to it.
    InPlace(PathBuf),
}

impl Destination {
    fn directory(&self) -> &Path {
        match self {
            Destination::Directory(dir) => dir,
            Destination::InPlace(path) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            },
        }
    }
}

/// Result of writing one block.
#[derive(Debug)]
pub struct BlockWrite {
    /// Block index, `None` for a single-file audit.
    pub index: Option<usize>,
    pub accounts: usize,
    pub result: AuditResult<PathBuf>,
}

#[derive(Serialize)]
struct RawAuditDocument<'a> {
    #[serde(rename = "administrator")]
    identity: &'a AdminIdentity,
    #[serde(rename = "administeredAccounts")]
    accounts: Vec<&'a Account>,
}

pub fn raw_audit_file_name(
    admin_name: &str,
    env: Environment,
    part: Option<usize>,
    at: DateTime<Utc>,
) -> String {
    let admin = sanitize_file_component(admin_name);
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    match part {
        Some(i) => format!("audit_{}_accounts_{}_part-{}_{}.txt", admin, env, i, timestamp),
        None => format!("audit_{}_accounts_{}_{}.txt", admin, env, timestamp),
    }
}

/// Write the administrator record, one file per block, each block ordered
/// by most recent upload.
pub fn write_raw_audit(
    admin: &Administrator,
    env: Environment,
    destination: &Destination,
    block_size: usize,
    at: DateTime<Utc>,
) -> Vec<BlockWrite> {
    let blocks = partition(admin.accounts.as_slice(), block_size);
    let partitioned = blocks.len() > 1;
    if partitioned {
        log::info!(
            "building audits ... {} accounts as {} blocks",
            admin.accounts.len(),
            blocks.len()
        );
    } else {
        log::info!("building audit ... {} accounts", admin.accounts.len());
    }

    blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| {
            let index = partitioned.then_some(i);
            let path = match (destination, index) {
                (Destination::InPlace(path), None) => path.clone(),
                _ => destination
                    .directory()
                    .join(raw_audit_file_name(&admin.identity.name, env, index, at)),
            };
            let result = write_block(&admin.identity, block, &path).map(|_| path);
            match &result {
                Ok(path) => log::info!("wrote audit block {} to {}", i, path.display()),
                Err(e) => log::warn!("error writing audit block {}: {}", i, e),
            }
            BlockWrite {
                index,
                accounts: block.len(),
                result,
            }
        })
        .collect()
}

fn write_block(identity: &AdminIdentity, block: &[Account], path: &Path) -> AuditResult<()> {
    let document = RawAuditDocument {
        identity,
        accounts: AccountView::from(block).sort_by_recency().into_vec(),
    };
    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| AuditError::persistence(path, e))?;
    atomic_write_str(path, &json).map_err(|e| AuditError::persistence(path, e))
}

/// `report_` prefixed to the raw artifact's file name, same directory.
pub fn summary_report_path(raw_path: &Path) -> PathBuf {
    let name = raw_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    raw_path.with_file_name(format!("report_{}", name))
}

pub fn write_summary_report(basics: &[AccountBasics], raw_path: &Path) -> AuditResult<PathBuf> {
    let path = summary_report_path(raw_path);
    let json =
        serde_json::to_string_pretty(basics).map_err(|e| AuditError::persistence(&path, e))?;
    atomic_write_str(&path, &json).map_err(|e| AuditError::persistence(&path, e))?;
    log::info!("wrote summary report to {}", path.display());
    Ok(path)
}

/// Parse a raw audit written by `write_raw_audit` into a fresh record.
///
/// An unreadable file is a `Persistence` error; anything that is not a raw
/// audit document is a `Format` error. Nothing is returned on failure, so a
/// caller's current record is never half-replaced.
pub fn reload(path: &Path) -> AuditResult<Administrator> {
    log::info!("loading audit report {} ...", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| AuditError::persistence(path, e))?;

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| AuditError::format(path, e))?;
    let is_audit = value
        .as_object()
        .is_some_and(|o| o.contains_key("administrator") || o.contains_key("administeredAccounts"));
    if !is_audit {
        return Err(AuditError::format(path, "not a raw audit document"));
    }

    let admin: Administrator =
        serde_json::from_value(value).map_err(|e| AuditError::format(path, e))?;
    log::info!("accounts in audit {}", admin.accounts.len());
    Ok(admin)
}
