//! Registry validator: duplicate blocks, duplicate sats, invalid records and
//! gaps in the expected block range.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{file_path, partition_files, Occurrence};
use crate::config::PipelineConfig;
use crate::registry::{parse_records, BlockHeight, RegistryRecord, SatNumber};

/// Widest expected range the gap check will enumerate.
pub const MAX_EXPECTED_SPAN: u64 = 50_000_000;

/// A block claimed by more than one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateBlock {
    pub block: BlockHeight,
    /// In scan order
    pub occurrences: Vec<Occurrence>,
}

/// A sat backing more than one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSat {
    pub sat: SatNumber,
    pub occurrences: Vec<Occurrence>,
}

/// A record, or a whole file, that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidRecord {
    pub file: String,
    /// `None` when the whole file was rejected
    pub index: Option<usize>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub generated_at: String,
    pub files_scanned: usize,
    pub total_records: usize,
    pub unique_blocks: usize,
    pub unique_sats: usize,
    /// Inclusive range checked for gaps
    pub expected_range: Option<(BlockHeight, BlockHeight)>,
    pub duplicate_blocks: Vec<DuplicateBlock>,
    pub duplicate_sats: Vec<DuplicateSat>,
    pub invalid_records: Vec<InvalidRecord>,
    pub missing_blocks: Vec<BlockHeight>,
}

impl ValidationReport {
    /// Whether the registry needs attention.
    pub fn has_issues(&self) -> bool {
        !self.duplicate_blocks.is_empty()
            || !self.duplicate_sats.is_empty()
            || !self.invalid_records.is_empty()
            || !self.missing_blocks.is_empty()
    }
}

fn invalid_reason(record: &RegistryRecord) -> Option<&'static str> {
    match (record.block, record.sat) {
        (Some(_), Some(_)) => None,
        (None, Some(_)) => Some("missing or unparseable block"),
        (Some(_), None) => Some("missing or unparseable sat"),
        (None, None) => Some("missing or unparseable block and sat"),
    }
}

/// Scan every partition in `config.registry_dir` once.
///
/// Only an unreadable registry directory or an explicit range wider than
/// [`MAX_EXPECTED_SPAN`] is fatal; unreadable or malformed files are listed
/// as invalid and the scan continues.
pub fn validate(config: &PipelineConfig) -> Result<ValidationReport> {
    if let (Some(start), Some(end)) = (config.expected_start, config.expected_end) {
        if end.saturating_sub(start) >= MAX_EXPECTED_SPAN {
            bail!(
                "Expected range {}..={} spans more than {} blocks",
                start,
                end,
                MAX_EXPECTED_SPAN
            );
        }
    }
    let files = partition_files(&config.registry_dir, &config.pattern)?;
    Ok(validate_files(&config.registry_dir, &files, config))
}

fn validate_files(dir: &Path, files: &[String], config: &PipelineConfig) -> ValidationReport {
    let mut by_block: BTreeMap<BlockHeight, Vec<Occurrence>> = BTreeMap::new();
    let mut by_sat: BTreeMap<SatNumber, Vec<Occurrence>> = BTreeMap::new();
    let mut invalid_records = Vec::new();
    let mut total_records = 0usize;

    for file in files {
        let path = file_path(dir, file);
        let records = match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| parse_records(file, &text).map_err(|e| e.to_string()))
        {
            Ok(records) => records,
            Err(reason) => {
                tracing::warn!(file = %file, reason = %reason, "partition rejected");
                invalid_records.push(InvalidRecord {
                    file: file.clone(),
                    index: None,
                    reason,
                });
                continue;
            }
        };

        total_records += records.len();
        for (index, value) in records.iter().enumerate() {
            let record = match RegistryRecord::from_value(value) {
                Some(record) => record,
                None => {
                    invalid_records.push(InvalidRecord {
                        file: file.clone(),
                        index: Some(index),
                        reason: "record is not an object".to_string(),
                    });
                    continue;
                }
            };
            if let Some(reason) = invalid_reason(&record) {
                tracing::debug!(file = %file, index, reason, "invalid record");
                invalid_records.push(InvalidRecord {
                    file: file.clone(),
                    index: Some(index),
                    reason: reason.to_string(),
                });
                continue;
            }
            let (Some(block), Some(sat)) = (record.block, record.sat) else {
                continue;
            };
            let occurrence = Occurrence {
                file: file.clone(),
                index,
                block,
                sat,
                id: record.id,
            };
            by_sat.entry(sat).or_default().push(occurrence.clone());
            by_block.entry(block).or_default().push(occurrence);
        }
    }

    let start = config.expected_start.unwrap_or(0);
    let expected_range = config
        .expected_end
        .or_else(|| by_block.keys().next_back().copied())
        .map(|end| (start, end));
    let missing_blocks = match expected_range {
        // An observed maximum far above the start is capped like an explicit end
        Some((start, end)) => (start..=end.min(start.saturating_add(MAX_EXPECTED_SPAN - 1)))
            .filter(|b| !by_block.contains_key(b))
            .collect(),
        None => Vec::new(),
    };

    let unique_blocks = by_block.len();
    let unique_sats = by_sat.len();
    let duplicate_blocks: Vec<DuplicateBlock> = by_block
        .into_iter()
        .filter(|(_, occurrences)| occurrences.len() > 1)
        .map(|(block, occurrences)| DuplicateBlock { block, occurrences })
        .collect();
    let duplicate_sats: Vec<DuplicateSat> = by_sat
        .into_iter()
        .filter(|(_, occurrences)| occurrences.len() > 1)
        .map(|(sat, occurrences)| DuplicateSat { sat, occurrences })
        .collect();

    tracing::info!(
        files = files.len(),
        records = total_records,
        duplicate_blocks = duplicate_blocks.len(),
        duplicate_sats = duplicate_sats.len(),
        invalid = invalid_records.len(),
        missing = missing_blocks.len(),
        "validation complete"
    );

    ValidationReport {
        generated_at: crate::report::generated_at(),
        files_scanned: files.len(),
        total_records,
        unique_blocks,
        unique_sats,
        expected_range,
        duplicate_blocks,
        duplicate_sats,
        invalid_records,
        missing_blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        dir
    }

    #[test]
    fn test_duplicates_in_scan_order() {
        let dir = registry(&[
            ("b.json", r#"[{"block":1,"sat":11,"iD":"x"},{"block":2,"sat":20}]"#),
            ("a.json", r#"[{"block":0,"sat":0},{"block":1,"sat":10}]"#),
        ]);
        let report = validate(&PipelineConfig::new(dir.path())).unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.total_records, 4);
        assert_eq!(report.duplicate_blocks.len(), 1);
        let dup = &report.duplicate_blocks[0];
        assert_eq!(dup.block, 1);
        assert_eq!(dup.occurrences[0].file, "a.json");
        assert_eq!(dup.occurrences[0].sat, 10);
        assert_eq!(dup.occurrences[1].file, "b.json");
        assert_eq!(dup.occurrences[1].id.as_deref(), Some("x"));
        assert!(report.duplicate_sats.is_empty());
        assert!(report.missing_blocks.is_empty());
    }

    #[test]
    fn test_duplicate_sats_and_invalid_records() {
        let dir = registry(&[
            (
                "a.json",
                r#"[{"block":0,"sat":5},{"blockheight":"1","sat":5},{"block":"x","sat":6},3]"#,
            ),
            ("b.json", r#"{"block":2}"#),
        ]);
        let report = validate(&PipelineConfig::new(dir.path())).unwrap();
        assert_eq!(report.duplicate_sats.len(), 1);
        assert_eq!(report.duplicate_sats[0].occurrences.len(), 2);
        assert_eq!(report.invalid_records.len(), 3);
        assert!(report.invalid_records.iter().any(|r| r.file == "b.json" && r.index.is_none()));
        assert!(report.has_issues());
    }

    #[test]
    fn test_missing_blocks_default_and_explicit_range() {
        let dir = registry(&[("a.json", r#"[{"block":0,"sat":0},{"block":3,"sat":3}]"#)]);
        let report = validate(&PipelineConfig::new(dir.path())).unwrap();
        assert_eq!(report.expected_range, Some((0, 3)));
        assert_eq!(report.missing_blocks, vec![1, 2]);

        let mut config = PipelineConfig::new(dir.path());
        config.expected_start = Some(2);
        config.expected_end = Some(5);
        let report = validate(&config).unwrap();
        assert_eq!(report.missing_blocks, vec![2, 4, 5]);
    }

    #[test]
    fn test_start_only_range_runs_to_highest_observed() {
        let records: Vec<String> = (0..=9u64)
            .filter(|b| *b != 7)
            .map(|b| format!(r#"{{"block":{},"sat":{}}}"#, b, b))
            .collect();
        let text = format!("[{}]", records.join(","));
        let dir = registry(&[("0-9.json", text.as_str())]);

        let mut config = PipelineConfig::new(dir.path());
        config.expected_start = Some(0);
        let report = validate(&config).unwrap();
        assert_eq!(report.expected_range, Some((0, 9)));
        assert_eq!(report.missing_blocks, vec![7]);

        config.expected_start = Some(8);
        let report = validate(&config).unwrap();
        assert_eq!(report.expected_range, Some((8, 9)));
        assert!(report.missing_blocks.is_empty());
    }

    #[test]
    fn test_oversized_explicit_range_is_rejected() {
        let dir = registry(&[("a.json", r#"[{"block":0,"sat":0}]"#)]);
        let mut config = PipelineConfig::new(dir.path());
        config.expected_end = Some(u64::MAX);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("spans more than"));
    }

    #[test]
    fn test_clean_registry() {
        let dir = registry(&[("a.json", r#"[{"block":0,"sat":0},{"block":1,"sat":1}]"#)]);
        let report = validate(&PipelineConfig::new(dir.path())).unwrap();
        assert!(!report.has_issues());
        assert_eq!(report.unique_blocks, 2);
        assert_eq!(report.unique_sats, 2);
    }
}
