//! Batch Reconciler
//!
//! Diffs every partition file two registries have in common, in lexical
//! filename order, and turns the block conflicts found along the way into
//! resolver input by looking up each side's inscription identity in the
//! partition covering the disputed block.
//!
//! Files present in only one registry are reported as exclusive and never
//! compared. A file that is not a JSON array on either side is skipped and
//! recorded; neither condition aborts the run.

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ReconcileConfig;
use crate::diff::{diff, DiffEntry, DiffStats};
use crate::error::LookupError;
use crate::inscription::InscriptionId;
use crate::registry::{
    filter_by_pattern, parse_records, BlockHeight, KeyedDataset, RegistryRecord, RegistrySource,
    SatNumber,
};
use crate::resolver::Conflict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    A,
    B,
}

/// Per-file comparison summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub file: String,
    pub stats: DiffStats,
    /// Records skipped on either side for missing or malformed fields
    pub skipped_records: usize,
}

/// A file pair left out of the comparison.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Files found in only one registry.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveFiles {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
}

impl ExclusiveFiles {
    pub fn is_empty(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty()
    }
}

/// A block claimed through different sats, with both identities attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConflictRecord {
    pub block: BlockHeight,
    /// File the conflict was first seen in
    pub file: String,
    pub sat_a: SatNumber,
    pub sat_b: SatNumber,
    pub identity_a: Option<InscriptionId>,
    pub identity_b: Option<InscriptionId>,
}

impl BlockConflictRecord {
    pub fn to_conflict(&self) -> Conflict {
        Conflict {
            block: self.block,
            claimant_a: self.identity_a.clone(),
            claimant_b: self.identity_b.clone(),
            sat_a: self.sat_a,
            sat_b: self.sat_b,
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub generated_at: String,
    pub label_a: String,
    pub label_b: String,
    /// Totals over all compared files; block conflicts are counted once per block
    pub stats: DiffStats,
    pub files: Vec<FileOutcome>,
    pub exclusive_files: ExclusiveFiles,
    pub skipped_files: Vec<SkippedFile>,
    pub block_conflicts: Vec<BlockConflictRecord>,
}

impl BatchReport {
    /// Resolver input, in the order conflicts were found.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.block_conflicts.iter().map(BlockConflictRecord::to_conflict).collect()
    }

    pub fn has_differences(&self) -> bool {
        self.stats.has_differences()
            || !self.exclusive_files.is_empty()
            || !self.skipped_files.is_empty()
    }
}

type Fetched = Result<Arc<Vec<Value>>, String>;

/// Compares two registries file by file.
pub struct BatchReconciler {
    a: Box<dyn RegistrySource>,
    b: Box<dyn RegistrySource>,
    config: ReconcileConfig,
    /// Parsed partitions, at most one fetch per (side, filename)
    partitions: FxHashMap<(Side, String), Fetched>,
}

impl BatchReconciler {
    pub fn new(
        a: Box<dyn RegistrySource>,
        b: Box<dyn RegistrySource>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            a,
            b,
            config,
            partitions: FxHashMap::default(),
        }
    }

    /// Number of partition fetches made so far.
    pub fn fetches(&self) -> usize {
        self.partitions.len()
    }

    fn source_id(&self, side: Side) -> &str {
        match side {
            Side::A => self.a.id(),
            Side::B => self.b.id(),
        }
    }

    async fn fetch(&mut self, side: Side, file: &str) -> Fetched {
        let key = (side, file.to_string());
        if let Some(cached) = self.partitions.get(&key) {
            return cached.clone();
        }

        let source = match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        };
        let source_id = format!("{}:{}", source.id(), file);
        let fetched = match source.read_file(file).await {
            Ok(text) => parse_records(&source_id, &text)
                .map(Arc::new)
                .map_err(|e| e.to_string()),
            Err(err) => Err(format!("{:#}", err)),
        };
        self.partitions.insert(key, fetched.clone());
        fetched
    }

    /// List both sources and split the matching names into common and
    /// exclusive files.
    async fn plan(&mut self) -> Result<(Vec<String>, ExclusiveFiles)> {
        let names_a = self
            .a
            .list_files()
            .await
            .with_context(|| format!("Failed to list registry {}", self.config.source_a))?;
        let names_b = self
            .b
            .list_files()
            .await
            .with_context(|| format!("Failed to list registry {}", self.config.source_b))?;
        let files_a: BTreeSet<String> = filter_by_pattern(names_a, &self.config.pattern)?
            .into_iter()
            .collect();
        let files_b: BTreeSet<String> = filter_by_pattern(names_b, &self.config.pattern)?
            .into_iter()
            .collect();

        let common = files_a.intersection(&files_b).cloned().collect();
        let exclusive = ExclusiveFiles {
            only_in_a: files_a.difference(&files_b).cloned().collect(),
            only_in_b: files_b.difference(&files_a).cloned().collect(),
        };
        Ok((common, exclusive))
    }

    /// Run the comparison. Only listing failures are fatal.
    pub async fn run(&mut self) -> Result<BatchReport> {
        let (common, exclusive_files) = self.plan().await?;
        for file in &exclusive_files.only_in_a {
            tracing::warn!(
                file = %file,
                registry = %self.config.label_a,
                "file exists in one registry only"
            );
        }
        for file in &exclusive_files.only_in_b {
            tracing::warn!(
                file = %file,
                registry = %self.config.label_b,
                "file exists in one registry only"
            );
        }
        tracing::info!(files = common.len(), "comparing common partition files");

        let mut stats = DiffStats::default();
        let mut files = Vec::with_capacity(common.len());
        let mut skipped_files = Vec::new();
        let mut pending: Vec<(String, BlockHeight, SatNumber, SatNumber)> = Vec::new();
        let mut seen_blocks: FxHashSet<BlockHeight> = FxHashSet::default();

        for file in &common {
            let records_a = self.fetch(Side::A, file).await;
            let records_b = self.fetch(Side::B, file).await;
            let (records_a, records_b) = match (records_a, records_b) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(reason), _) | (_, Err(reason)) => {
                    tracing::warn!(file = %file, reason = %reason, "skipping file pair");
                    skipped_files.push(SkippedFile {
                        file: file.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let id_a = format!("{}:{}", self.source_id(Side::A), file);
            let id_b = format!("{}:{}", self.source_id(Side::B), file);
            let (dataset_a, skipped_a) =
                KeyedDataset::from_records(&self.config.label_a, &id_a, &records_a);
            let (dataset_b, skipped_b) =
                KeyedDataset::from_records(&self.config.label_b, &id_b, &records_b);
            for err in skipped_a.iter().chain(skipped_b.iter()) {
                tracing::debug!(file = %file, "{}", err);
            }

            let report = diff(&dataset_a, &dataset_b);
            tracing::debug!(
                file = %file,
                matches = report.stats.matches,
                conflicts = report.stats.conflicts,
                "file compared"
            );

            for entry in report.block_conflicts() {
                if let DiffEntry::BlockConflict { block, sat_a, sat_b } = entry {
                    if seen_blocks.insert(*block) {
                        pending.push((file.clone(), *block, *sat_a, *sat_b));
                    }
                }
            }

            stats.absorb(&report.stats);
            files.push(FileOutcome {
                file: file.clone(),
                stats: report.stats,
                skipped_records: skipped_a.len() + skipped_b.len(),
            });
        }

        stats.block_conflicts = pending.len();
        stats.conflicts = stats.sat_conflicts + stats.block_conflicts;

        let mut block_conflicts = Vec::with_capacity(pending.len());
        for (file, block, sat_a, sat_b) in pending {
            let identity_a = self.identity_or_none(Side::A, block, sat_a).await;
            let identity_b = self.identity_or_none(Side::B, block, sat_b).await;
            block_conflicts.push(BlockConflictRecord {
                block,
                file,
                sat_a,
                sat_b,
                identity_a,
                identity_b,
            });
        }

        Ok(BatchReport {
            generated_at: crate::report::generated_at(),
            label_a: self.config.label_a.clone(),
            label_b: self.config.label_b.clone(),
            stats,
            files,
            exclusive_files,
            skipped_files,
            block_conflicts,
        })
    }

    async fn identity_or_none(
        &mut self,
        side: Side,
        block: BlockHeight,
        sat: SatNumber,
    ) -> Option<InscriptionId> {
        match self.lookup_identity(side, block, sat).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(block, sat, "{}", err);
                None
            }
        }
    }

    /// Inscription id recorded for `block` in the partition covering it.
    async fn lookup_identity(
        &mut self,
        side: Side,
        block: BlockHeight,
        sat: SatNumber,
    ) -> Result<InscriptionId, LookupError> {
        let file = self.config.partition.file_for(block);
        let source_id = self.source_id(side).to_string();
        let records = self.fetch(side, &file).await.map_err(|reason| LookupError::Fetch {
            source_id: source_id.clone(),
            file: file.clone(),
            reason,
        })?;

        let not_found = || LookupError::NotFound {
            source_id: source_id.clone(),
            file: file.clone(),
            block,
        };
        let candidates: Vec<RegistryRecord> = records
            .iter()
            .filter_map(RegistryRecord::from_value)
            .filter(|r| r.block == Some(block))
            .collect();
        let record = candidates
            .iter()
            .find(|r| r.sat == Some(sat))
            .or_else(|| candidates.first())
            .ok_or_else(not_found)?;
        let raw = record.id.as_deref().ok_or_else(not_found)?;
        raw.parse::<InscriptionId>().map_err(|e| LookupError::Fetch {
            source_id: source_id.clone(),
            file: file.clone(),
            reason: e.to_string(),
        })
    }
}

/// Format a batch report for display.
pub fn format_batch_report(report: &BatchReport) -> String {
    let stats = &report.stats;
    let mut msg = String::new();
    msg.push_str(&format!(
        "Batch reconciliation: {} vs {} ({} files compared)\n",
        report.label_a,
        report.label_b,
        report.files.len()
    ));
    msg.push_str(&format!(
        "Summary: {} matches, {} conflicts ({} sat, {} block), {} only in {}, {} only in {}\n",
        stats.matches,
        stats.conflicts,
        stats.sat_conflicts,
        stats.block_conflicts,
        stats.file1_only,
        report.label_a,
        stats.file2_only,
        report.label_b
    ));

    if !report.exclusive_files.is_empty() {
        msg.push_str("Exclusive files:\n");
        for file in &report.exclusive_files.only_in_a {
            msg.push_str(&format!("  {} only in {}\n", file, report.label_a));
        }
        for file in &report.exclusive_files.only_in_b {
            msg.push_str(&format!("  {} only in {}\n", file, report.label_b));
        }
    }

    if !report.skipped_files.is_empty() {
        msg.push_str("Skipped files:\n");
        for skipped in &report.skipped_files {
            msg.push_str(&format!("  {}: {}\n", skipped.file, skipped.reason));
        }
    }

    if !report.block_conflicts.is_empty() {
        msg.push_str("Block conflicts:\n");
        let show = |id: &Option<InscriptionId>| {
            id.as_ref()
                .map_or_else(|| "not found".to_string(), |id| id.to_string())
        };
        for conflict in &report.block_conflicts {
            msg.push_str(&format!(
                "  block {} ({}): {} sat {} [{}] vs {} sat {} [{}]\n",
                conflict.block,
                conflict.file,
                report.label_a,
                conflict.sat_a,
                show(&conflict.identity_a),
                report.label_b,
                conflict.sat_b,
                show(&conflict.identity_b)
            ));
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PartitionScheme, RegistryLocation};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const TX_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TX_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct MemorySource {
        label: String,
        files: BTreeMap<String, String>,
        reads: Arc<Mutex<Vec<String>>>,
    }

    impl MemorySource {
        fn boxed(
            label: &str,
            files: &[(&str, String)],
            reads: Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn RegistrySource> {
            Box::new(Self {
                label: label.to_string(),
                files: files.iter().map(|(n, t)| (n.to_string(), t.clone())).collect(),
                reads,
            })
        }
    }

    #[async_trait]
    impl RegistrySource for MemorySource {
        fn id(&self) -> &str {
            &self.label
        }

        async fn list_files(&mut self) -> Result<Vec<String>> {
            Ok(self.files.keys().cloned().collect())
        }

        async fn read_file(&mut self, name: &str) -> Result<String> {
            self.reads.lock().unwrap().push(format!("{}:{}", self.label, name));
            self.files
                .get(name)
                .cloned()
                .with_context(|| format!("no such file {}", name))
        }
    }

    fn config() -> ReconcileConfig {
        let mut config = ReconcileConfig::new(
            RegistryLocation::Local("a".into()),
            RegistryLocation::Local("b".into()),
        );
        config.partition = PartitionScheme {
            size: 100,
            template: "{start}-{end}.json".to_string(),
        };
        config
    }

    #[tokio::test]
    async fn test_block_conflict_gets_identities() {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let a = MemorySource::boxed(
            "A",
            &[("0-99.json", format!(r#"[{{"block":5,"iD":"{}i0","sat":100}}]"#, TX_A))],
            reads.clone(),
        );
        let b = MemorySource::boxed(
            "B",
            &[("0-99.json", format!(r#"[{{"block":5,"iD":"{}i0","sat":200}}]"#, TX_B))],
            reads.clone(),
        );
        let mut reconciler = BatchReconciler::new(a, b, config());
        let report = reconciler.run().await.unwrap();

        assert_eq!(report.block_conflicts.len(), 1);
        let conflict = &report.block_conflicts[0];
        assert_eq!(conflict.block, 5);
        assert_eq!(conflict.identity_a.as_ref().map(|id| id.txid()), Some(TX_A));
        assert_eq!(conflict.identity_b.as_ref().map(|id| id.txid()), Some(TX_B));
        assert_eq!(report.stats.block_conflicts, 1);
        assert!(report.has_differences());
        // The lookup reuses the partitions already read for the diff
        assert_eq!(reads.lock().unwrap().len(), 2);
        assert_eq!(reconciler.fetches(), 2);
    }

    #[tokio::test]
    async fn test_exclusive_and_skipped_files() {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let a = MemorySource::boxed(
            "A",
            &[
                ("0-99.json", r#"[{"sat":1,"block":1}]"#.to_string()),
                ("100-199.json", r#"{"not":"an array"}"#.to_string()),
                ("200-299.json", "[]".to_string()),
            ],
            reads.clone(),
        );
        let b = MemorySource::boxed(
            "B",
            &[
                ("0-99.json", r#"[{"sat":1,"block":1}]"#.to_string()),
                ("100-199.json", "[]".to_string()),
                ("300-399.json", "[]".to_string()),
            ],
            reads,
        );
        let report = BatchReconciler::new(a, b, config()).run().await.unwrap();
        assert_eq!(report.exclusive_files.only_in_a, vec!["200-299.json"]);
        assert_eq!(report.exclusive_files.only_in_b, vec!["300-399.json"]);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].file, "100-199.json");
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.stats.matches, 1);
    }

    #[tokio::test]
    async fn test_missing_identity_is_none() {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let file_a = ("0-99.json", r#"[{"sat":100,"block":5}]"#.to_string());
        let file_b = ("0-99.json", r#"[{"sat":200,"block":5}]"#.to_string());
        let a = MemorySource::boxed("A", &[file_a], reads.clone());
        let b = MemorySource::boxed("B", &[file_b], reads);
        let report = BatchReconciler::new(a, b, config()).run().await.unwrap();
        let conflicts = report.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].claimant_a, None);
        assert_eq!(conflicts[0].claimant_b, None);
        assert_eq!(conflicts[0].sat_a, 100);
        assert_eq!(conflicts[0].sat_b, 200);
    }

    #[tokio::test]
    async fn test_format_lists_conflicts() {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let file_a = ("0-99.json", r#"[{"sat":100,"block":5}]"#.to_string());
        let file_b = ("0-99.json", r#"[{"sat":200,"block":5}]"#.to_string());
        let a = MemorySource::boxed("A", &[file_a], reads.clone());
        let b = MemorySource::boxed("B", &[file_b], reads);
        let report = BatchReconciler::new(a, b, config()).run().await.unwrap();
        let text = format_batch_report(&report);
        assert!(text.contains("1 files compared"));
        assert!(text.contains(
            "block 5 (0-99.json): A sat 100 [not found] vs B sat 200 [not found]"
        ));
    }
}
