//! Duplicate competition
//!
//! For every duplicate block, the first occurrence whose sat agrees with the
//! authoritative block → sat index wins. Blocks the index does not cover, or
//! where no occurrence agrees with it, stay unresolved and are never decided
//! automatically.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use super::{DuplicateBlock, Occurrence, ValidationReport};
use crate::registry::{parse_records, BlockHeight, RegistryRecord, SatNumber};

/// Winning occurrence of a duplicate block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub block: BlockHeight,
    pub occurrence: Occurrence,
}

/// Losing occurrence, with the occurrence it lost to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loser {
    pub block: BlockHeight,
    pub occurrence: Occurrence,
    pub winner: Occurrence,
}

impl Loser {
    /// The loser carries the same claim as its winner.
    pub fn is_identical_to_winner(&self) -> bool {
        self.occurrence.same_claim(&self.winner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unresolved {
    pub block: BlockHeight,
    pub reason: String,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionReport {
    pub generated_at: String,
    pub winners: Vec<Placement>,
    pub losers: Vec<Loser>,
    pub unresolved: Vec<Unresolved>,
}

/// Load an authoritative block → sat index.
///
/// Accepts either a registry-shaped array of `{block, sat}` records or an
/// object mapping block heights to sats.
pub fn load_authoritative_index(path: &Path) -> Result<FxHashMap<BlockHeight, SatNumber>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read authoritative index: {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Malformed authoritative index: {}", path.display()))?;

    let mut index = FxHashMap::default();
    match value {
        Value::Object(map) => {
            for (block, sat) in map {
                let block: BlockHeight = block
                    .trim()
                    .parse()
                    .with_context(|| format!("Index key {:?} is not a block height", block))?;
                let sat = sat
                    .as_u64()
                    .or_else(|| sat.as_str().and_then(|s| s.trim().parse().ok()))
                    .with_context(|| format!("Index entry for block {} has no usable sat", block))?;
                index.insert(block, sat);
            }
        }
        Value::Array(_) => {
            let records = parse_records(&path.display().to_string(), &text)?;
            let mut skipped = 0usize;
            for record in records.iter().filter_map(RegistryRecord::from_value) {
                match (record.block, record.sat) {
                    (Some(block), Some(sat)) => {
                        index.entry(block).or_insert(sat);
                    }
                    _ => skipped += 1,
                }
            }
            if skipped > 0 {
                tracing::warn!(
                    skipped,
                    path = %path.display(),
                    "index records without block or sat ignored"
                );
            }
        }
        _ => anyhow::bail!(
            "Authoritative index {} must be a JSON array or object",
            path.display()
        ),
    }
    Ok(index)
}

fn compete_block(
    duplicate: &DuplicateBlock,
    index: &FxHashMap<BlockHeight, SatNumber>,
    report: &mut CompetitionReport,
) {
    let block = duplicate.block;
    let Some(&authoritative) = index.get(&block) else {
        report.unresolved.push(Unresolved {
            block,
            reason: "block not present in the authoritative index".to_string(),
            occurrences: duplicate.occurrences.clone(),
        });
        return;
    };

    let Some(winner_at) = duplicate.occurrences.iter().position(|o| o.sat == authoritative) else {
        report.unresolved.push(Unresolved {
            block,
            reason: format!("no occurrence carries the authoritative sat {}", authoritative),
            occurrences: duplicate.occurrences.clone(),
        });
        return;
    };

    let winner = duplicate.occurrences[winner_at].clone();
    for (i, occurrence) in duplicate.occurrences.iter().enumerate() {
        if i != winner_at {
            report.losers.push(Loser {
                block,
                occurrence: occurrence.clone(),
                winner: winner.clone(),
            });
        }
    }
    report.winners.push(Placement {
        block,
        occurrence: winner,
    });
}

/// Decide every duplicate block in `validation`.
pub fn compete(
    validation: &ValidationReport,
    index: &FxHashMap<BlockHeight, SatNumber>,
) -> CompetitionReport {
    let mut report = CompetitionReport {
        generated_at: crate::report::generated_at(),
        winners: Vec::new(),
        losers: Vec::new(),
        unresolved: Vec::new(),
    };
    for duplicate in &validation.duplicate_blocks {
        compete_block(duplicate, index, &mut report);
    }
    for unresolved in &report.unresolved {
        tracing::warn!(
            block = unresolved.block,
            reason = %unresolved.reason,
            "duplicate left unresolved"
        );
    }
    tracing::info!(
        winners = report.winners.len(),
        losers = report.losers.len(),
        unresolved = report.unresolved.len(),
        "competition complete"
    );
    report
}
