//! Duplicate remover
//!
//! Deletes one record per loser. The loser's recorded file is searched first,
//! then every other partition in lexical order, since earlier removals and
//! manual edits can move records around. Files are rewritten atomically.
//!
//! A loser that carries the same claim as its winner is only removed while
//! more than one copy of that claim remains, so the winner always survives
//! and a second run over the same losers removes nothing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::{file_path, partition_files, Loser, Occurrence};
use crate::config::PipelineConfig;
use crate::registry::{parse_records, RegistryRecord};

/// One record taken out of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub loser: Occurrence,
    /// File and index the record was actually removed from
    pub file: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRemoval {
    pub loser: Occurrence,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub generated_at: String,
    pub dry_run: bool,
    pub removed: Vec<Removal>,
    pub failed: Vec<FailedRemoval>,
    pub not_found: Vec<Occurrence>,
}

/// Removes losing records from a registry directory.
pub struct Remover {
    dir: PathBuf,
    pattern: String,
    dry_run: bool,
    /// Parsed partitions, kept in step with every removal
    files: BTreeMap<String, Vec<Value>>,
    /// Files that failed to load, with the reason
    unreadable: BTreeMap<String, String>,
}

impl Remover {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dir: config.registry_dir.clone(),
            pattern: config.pattern.clone(),
            dry_run: config.dry_run,
            files: BTreeMap::new(),
            unreadable: BTreeMap::new(),
        }
    }

    fn load(&mut self, name: &str) -> Result<&mut Vec<Value>, String> {
        if let Some(reason) = self.unreadable.get(name) {
            return Err(reason.clone());
        }
        if !self.files.contains_key(name) {
            let path = file_path(&self.dir, name);
            let loaded = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))
                .and_then(|text| parse_records(name, &text).map_err(|e| e.to_string()));
            match loaded {
                Ok(records) => {
                    self.files.insert(name.to_string(), records);
                }
                Err(reason) => {
                    self.unreadable.insert(name.to_string(), reason.clone());
                    return Err(reason);
                }
            }
        }
        self.files
            .get_mut(name)
            .ok_or_else(|| format!("{} not loaded", name))
    }

    fn save(&self, name: &str) -> Result<()> {
        let records = self
            .files
            .get(name)
            .with_context(|| format!("{} not loaded", name))?;
        let mut data = serde_json::to_vec_pretty(records)
            .with_context(|| format!("Failed to serialize {}", name))?;
        data.push(b'\n');
        crate::report::write_atomic(&file_path(&self.dir, name), &data)
    }

    /// Matching record positions across the search order for `loser`.
    fn find_matches(
        &mut self,
        order: &[String],
        loser: &Occurrence,
    ) -> Result<Vec<(String, usize)>, String> {
        let mut matches = Vec::new();
        for name in order {
            let records = match self.load(name) {
                Ok(records) => records,
                Err(reason) if name == &loser.file => return Err(reason),
                Err(reason) => {
                    tracing::debug!(
                        file = %name,
                        reason = %reason,
                        "skipping unreadable partition"
                    );
                    continue;
                }
            };
            for (index, value) in records.iter().enumerate() {
                if RegistryRecord::from_value(value).is_some_and(|r| loser.matches(&r)) {
                    matches.push((name.clone(), index));
                }
            }
        }
        Ok(matches)
    }

    fn search_order(files: &[String], loser: &Occurrence) -> Vec<String> {
        let mut order = Vec::with_capacity(files.len() + 1);
        order.push(loser.file.clone());
        order.extend(files.iter().filter(|f| **f != loser.file).cloned());
        order
    }

    /// Pick which match to delete: the recorded position when it still
    /// holds the record, otherwise the first match in search order that is
    /// not the winner's recorded position.
    fn choose(matches: &[(String, usize)], loser: &Loser) -> Option<(String, usize)> {
        let at = |(file, index): &(String, usize), occurrence: &Occurrence| {
            *file == occurrence.file && *index == occurrence.index
        };
        matches
            .iter()
            .find(|m| at(m, &loser.occurrence))
            .or_else(|| matches.iter().find(|m| !at(m, &loser.winner)))
            .or_else(|| matches.first())
            .cloned()
    }

    /// Remove every loser. Only an unreadable registry directory is fatal.
    pub fn remove(&mut self, losers: &[Loser]) -> Result<RemovalReport> {
        let files = partition_files(&self.dir, &self.pattern)?;
        let mut report = RemovalReport {
            generated_at: crate::report::generated_at(),
            dry_run: self.dry_run,
            removed: Vec::new(),
            failed: Vec::new(),
            not_found: Vec::new(),
        };
        let mut dirty: BTreeSet<String> = BTreeSet::new();

        for loser in losers {
            let occurrence = &loser.occurrence;
            let order = Self::search_order(&files, occurrence);
            let matches = match self.find_matches(&order, occurrence) {
                Ok(matches) => matches,
                Err(reason) => {
                    tracing::warn!(
                        block = loser.block,
                        file = %occurrence.file,
                        reason = %reason,
                        "removal failed"
                    );
                    report.failed.push(FailedRemoval {
                        loser: occurrence.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let required = if loser.is_identical_to_winner() { 2 } else { 1 };
            if matches.len() < required {
                tracing::info!(block = loser.block, sat = occurrence.sat, "loser already removed");
                report.not_found.push(occurrence.clone());
                continue;
            }

            let Some((file, index)) = Self::choose(&matches, loser) else {
                report.not_found.push(occurrence.clone());
                continue;
            };
            if let Some(records) = self.files.get_mut(&file) {
                records.remove(index);
            }

            if !self.dry_run {
                if let Err(err) = self.save(&file) {
                    tracing::warn!(file = %file, error = %format!("{:#}", err), "rewrite failed");
                    report.failed.push(FailedRemoval {
                        loser: occurrence.clone(),
                        reason: format!("{:#}", err),
                    });
                    self.files.remove(&file);
                    continue;
                }
            }
            dirty.insert(file.clone());
            tracing::info!(
                block = loser.block,
                sat = occurrence.sat,
                file = %file,
                index,
                dry_run = self.dry_run,
                "removed duplicate record"
            );
            report.removed.push(Removal {
                loser: occurrence.clone(),
                file,
                index,
            });
        }

        tracing::info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            not_found = report.not_found.len(),
            files_touched = dirty.len(),
            dry_run = self.dry_run,
            "removal complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(file: &str, index: usize, block: u64, sat: u64) -> Occurrence {
        Occurrence {
            file: file.to_string(),
            index,
            block,
            sat,
            id: None,
        }
    }

    fn read(dir: &std::path::Path, name: &str) -> Vec<Value> {
        serde_json::from_str(&std::fs::read_to_string(dir.join(name)).unwrap()).unwrap()
    }

    #[test]
    fn test_removes_one_instance_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"[{"block":1,"sat":10},{"block":1,"sat":11},{"block":2,"sat":20}]"#,
        )
        .unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("a.json", 1, 1, 11),
            winner: occ("a.json", 0, 1, 10),
        }];
        let config = PipelineConfig::new(dir.path());

        let first = Remover::new(&config).remove(&losers).unwrap();
        assert_eq!(first.removed.len(), 1);
        assert_eq!(read(dir.path(), "a.json").len(), 2);

        let second = Remover::new(&config).remove(&losers).unwrap();
        assert!(second.removed.is_empty());
        assert_eq!(second.not_found.len(), first.removed.len());
    }

    #[test]
    fn test_identical_loser_keeps_last_copy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"block":1,"sat":10}]"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"[{"block":1,"sat":10}]"#).unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("b.json", 0, 1, 10),
            winner: occ("a.json", 0, 1, 10),
        }];
        let config = PipelineConfig::new(dir.path());

        let first = Remover::new(&config).remove(&losers).unwrap();
        assert_eq!(first.removed.len(), 1);
        assert_eq!(first.removed[0].file, "b.json");
        assert_eq!(read(dir.path(), "a.json").len(), 1);
        assert!(read(dir.path(), "b.json").is_empty());

        let second = Remover::new(&config).remove(&losers).unwrap();
        assert!(second.removed.is_empty());
        assert_eq!(second.not_found.len(), 1);
        assert_eq!(read(dir.path(), "a.json").len(), 1);
    }

    #[test]
    fn test_searches_other_files_when_moved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"block":1,"sat":10}]"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"[{"block":1,"sat":11}]"#).unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("a.json", 5, 1, 11),
            winner: occ("a.json", 0, 1, 10),
        }];
        let report = Remover::new(&PipelineConfig::new(dir.path())).remove(&losers).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].file, "b.json");
        assert!(read(dir.path(), "b.json").is_empty());
    }

    #[test]
    fn test_dry_run_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let original = r#"[{"block":1,"sat":10},{"block":1,"sat":11}]"#;
        std::fs::write(dir.path().join("a.json"), original).unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("a.json", 1, 1, 11),
            winner: occ("a.json", 0, 1, 10),
        }];
        let mut config = PipelineConfig::new(dir.path());
        config.dry_run = true;
        let report = Remover::new(&config).remove(&losers).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.json")).unwrap(), original);
    }

    #[test]
    fn test_unreadable_recorded_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{broken").unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("a.json", 0, 1, 11),
            winner: occ("b.json", 0, 1, 10),
        }];
        let report = Remover::new(&PipelineConfig::new(dir.path())).remove(&losers).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_stale_identical_loser_spares_winner_copy() {
        let dir = tempfile::tempdir().unwrap();
        let a = r#"[{"block":1,"sat":10},{"block":2,"sat":20}]"#;
        let b = r#"[{"block":3,"sat":30},{"block":1,"sat":10}]"#;
        std::fs::write(dir.path().join("a.json"), a).unwrap();
        std::fs::write(dir.path().join("b.json"), b).unwrap();
        let losers = vec![Loser {
            block: 1,
            occurrence: occ("a.json", 4, 1, 10),
            winner: occ("a.json", 0, 1, 10),
        }];
        let report = Remover::new(&PipelineConfig::new(dir.path())).remove(&losers).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].file, "b.json");
        assert_eq!(report.removed[0].index, 1);
        assert_eq!(read(dir.path(), "a.json").len(), 2);
        assert_eq!(read(dir.path(), "b.json"), vec![serde_json::json!({"block": 3, "sat": 30})]);
    }
}
