//! Duplicate Pipeline
//!
//! Three stages over one registry directory, chained through JSON reports:
//!
//! 1. [`validator`] scans every partition once and records each block or sat
//!    that appears more than once, with every occurrence.
//! 2. [`competition`] picks, per duplicate block, the occurrence backed by an
//!    authoritative block → sat index. Everything else loses.
//! 3. [`remover`] deletes exactly one matching record per loser and rewrites
//!    the file atomically.
//!
//! Scan order is lexical filename order, then record index within the file.
//! "First occurrence" always means first in that order.

pub mod competition;
pub mod remover;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::registry::{filter_by_pattern, BlockHeight, RegistryRecord, SatNumber};

pub use competition::{
    compete, load_authoritative_index, CompetitionReport, Loser, Placement, Unresolved,
};
pub use remover::{RemovalReport, Remover};
pub use validator::{validate, DuplicateBlock, DuplicateSat, InvalidRecord, ValidationReport};

/// Where a record sits in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub file: String,
    pub index: usize,
    pub block: BlockHeight,
    pub sat: SatNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Occurrence {
    /// Whether `record` carries the same claim. A missing id on either side
    /// matches any id.
    pub fn matches(&self, record: &RegistryRecord) -> bool {
        record.matches(self.block, self.sat, self.id.as_deref())
    }

    /// Same block, sat and (where both are known) id.
    pub fn same_claim(&self, other: &Occurrence) -> bool {
        self.block == other.block
            && self.sat == other.sat
            && match (&self.id, &other.id) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// Partition files in `dir` matching `pattern`, in lexical order.
pub fn partition_files(dir: &Path, pattern: &str) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Registry directory not found: {}", dir.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    filter_by_pattern(names, pattern)
}

pub(crate) fn file_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
