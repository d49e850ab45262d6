//! Diff Engine
//!
//! Compares two sat → block datasets in both directions. Every key in the
//! union lands in exactly one of MATCH, SAT_CONFLICT, ONLY_IN_A or ONLY_IN_B.
//! Independently, the block → sats inverse of each side is compared so that
//! different sats claiming one block surface as a BLOCK_CONFLICT, which the
//! key-level view alone would report as unrelated ONLY_IN entries.

use serde::{Serialize, Serializer};

use crate::registry::{BlockHeight, KeyedDataset, SatNumber};

/// One classified disagreement (or agreement) between datasets A and B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffEntry {
    Match {
        sat: SatNumber,
        block: BlockHeight,
    },
    SatConflict {
        sat: SatNumber,
        block_a: BlockHeight,
        block_b: BlockHeight,
    },
    BlockConflict {
        block: BlockHeight,
        sat_a: SatNumber,
        sat_b: SatNumber,
    },
    OnlyInA {
        sat: SatNumber,
        block: BlockHeight,
    },
    OnlyInB {
        sat: SatNumber,
        block: BlockHeight,
    },
}

/// Outcome class of a [`DiffEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiffKind {
    Match,
    SatConflict,
    BlockConflict,
    OnlyInA,
    OnlyInB,
}

impl DiffEntry {
    pub fn kind(&self) -> DiffKind {
        match self {
            DiffEntry::Match { .. } => DiffKind::Match,
            DiffEntry::SatConflict { .. } => DiffKind::SatConflict,
            DiffEntry::BlockConflict { .. } => DiffKind::BlockConflict,
            DiffEntry::OnlyInA { .. } => DiffKind::OnlyInA,
            DiffEntry::OnlyInB { .. } => DiffKind::OnlyInB,
        }
    }

    /// The single disputed key, when the entry has one.
    pub fn sat(&self) -> Option<SatNumber> {
        match self {
            DiffEntry::Match { sat, .. }
            | DiffEntry::SatConflict { sat, .. }
            | DiffEntry::OnlyInA { sat, .. }
            | DiffEntry::OnlyInB { sat, .. } => Some(*sat),
            DiffEntry::BlockConflict { .. } => None,
        }
    }

    /// Ordering key: keyed entries by sat then block, block conflicts after
    /// them by block.
    fn sort_key(&self) -> (u8, u64, u64) {
        match self {
            DiffEntry::Match { sat, block }
            | DiffEntry::OnlyInA { sat, block }
            | DiffEntry::OnlyInB { sat, block } => (0, *sat, *block),
            DiffEntry::SatConflict { sat, block_a, .. } => (0, *sat, *block_a),
            DiffEntry::BlockConflict { block, sat_a, .. } => (1, *block, *sat_a),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DiffEntry::SatConflict { .. } | DiffEntry::BlockConflict { .. }
        )
    }

    /// Human-readable description using the dataset labels.
    pub fn describe(&self, label_a: &str, label_b: &str) -> String {
        match self {
            DiffEntry::Match { sat, block } => {
                format!("sat {} → block {} in both", sat, block)
            }
            DiffEntry::SatConflict {
                sat,
                block_a,
                block_b,
            } => format!(
                "sat {} claims block {} in {} but block {} in {}",
                sat, block_a, label_a, block_b, label_b
            ),
            DiffEntry::BlockConflict { block, sat_a, sat_b } => format!(
                "block {} is claimed by sat {} in {} and sat {} in {}",
                block, sat_a, label_a, sat_b, label_b
            ),
            DiffEntry::OnlyInA { sat, block } => {
                format!("sat {} → block {} only in {}", sat, block, label_a)
            }
            DiffEntry::OnlyInB { sat, block } => {
                format!("sat {} → block {} only in {}", sat, block, label_b)
            }
        }
    }
}

/// Summary counts for one comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub matches: usize,
    /// Sat conflicts plus block conflicts
    pub conflicts: usize,
    pub sat_conflicts: usize,
    pub block_conflicts: usize,
    pub file1_only: usize,
    pub file2_only: usize,
    /// Claims on a block beyond the first within the same dataset
    pub inner_block_collisions: usize,
}

impl DiffStats {
    /// Whether the comparison found any difference at all.
    pub fn has_differences(&self) -> bool {
        self.conflicts > 0 || self.file1_only > 0 || self.file2_only > 0
    }

    /// Fold another file's stats into this one.
    pub fn absorb(&mut self, other: &DiffStats) {
        self.matches += other.matches;
        self.conflicts += other.conflicts;
        self.sat_conflicts += other.sat_conflicts;
        self.block_conflicts += other.block_conflicts;
        self.file1_only += other.file1_only;
        self.file2_only += other.file2_only;
        self.inner_block_collisions += other.inner_block_collisions;
    }
}

/// Result of [`diff`].
#[derive(Debug, Clone, Default)]
pub struct DiffReport {
    pub label_a: String,
    pub label_b: String,
    pub entries: Vec<DiffEntry>,
    pub stats: DiffStats,
}

/// JSON form: every entry carries its description next to its fields.
impl Serialize for DiffReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Described<'a> {
            #[serde(flatten)]
            entry: &'a DiffEntry,
            description: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            label_a: &'a str,
            label_b: &'a str,
            stats: &'a DiffStats,
            entries: Vec<Described<'a>>,
        }

        Wire {
            label_a: &self.label_a,
            label_b: &self.label_b,
            stats: &self.stats,
            entries: self
                .entries
                .iter()
                .map(|entry| Described {
                    entry,
                    description: entry.describe(&self.label_a, &self.label_b),
                })
                .collect(),
        }
        .serialize(serializer)
    }
}

impl DiffReport {
    pub fn block_conflicts(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind() == DiffKind::BlockConflict)
    }

    pub fn count(&self, kind: DiffKind) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }
}

/// Compare dataset `a` against dataset `b`.
pub fn diff(a: &KeyedDataset, b: &KeyedDataset) -> DiffReport {
    let mut entries = Vec::with_capacity(a.len().max(b.len()));
    let mut stats = DiffStats::default();

    // Key-level view
    let mut keys: Vec<SatNumber> = a.iter().map(|(sat, _)| sat).collect();
    keys.extend(b.iter().map(|(sat, _)| sat).filter(|sat| !a.contains(*sat)));

    for sat in keys {
        match (a.get(sat), b.get(sat)) {
            (Some(ea), Some(eb)) if ea.block == eb.block => {
                stats.matches += 1;
                entries.push(DiffEntry::Match {
                    sat,
                    block: ea.block,
                });
            }
            (Some(ea), Some(eb)) => {
                stats.sat_conflicts += 1;
                entries.push(DiffEntry::SatConflict {
                    sat,
                    block_a: ea.block,
                    block_b: eb.block,
                });
            }
            (Some(ea), None) => {
                stats.file1_only += 1;
                entries.push(DiffEntry::OnlyInA {
                    sat,
                    block: ea.block,
                });
            }
            (None, Some(eb)) => {
                stats.file2_only += 1;
                entries.push(DiffEntry::OnlyInB {
                    sat,
                    block: eb.block,
                });
            }
            (None, None) => unreachable!("key drawn from the union of both datasets"),
        }
    }

    // Inverse (block-level) view
    let (inverse_a, collisions_a) = a.inverse();
    let (inverse_b, collisions_b) = b.inverse();
    stats.inner_block_collisions = collisions_a + collisions_b;

    for (block, sats_a) in &inverse_a {
        let Some(sats_b) = inverse_b.get(block) else {
            continue;
        };
        if sats_a == sats_b {
            continue;
        }
        stats.block_conflicts += 1;
        entries.push(DiffEntry::BlockConflict {
            block: *block,
            sat_a: representative(sats_a, sats_b),
            sat_b: representative(sats_b, sats_a),
        });
    }

    stats.conflicts = stats.sat_conflicts + stats.block_conflicts;
    entries.sort_by_key(DiffEntry::sort_key);

    DiffReport {
        label_a: a.label().to_string(),
        label_b: b.label().to_string(),
        entries,
        stats,
    }
}

/// Lowest sat of `own` that `other` lacks, else the lowest of `own`. Both
/// lists are ascending and non-empty.
fn representative(own: &[SatNumber], other: &[SatNumber]) -> SatNumber {
    own.iter()
        .copied()
        .find(|sat| other.binary_search(sat).is_err())
        .unwrap_or(own[0])
}

/// Format a diff report for display.
pub fn format_diff_report(report: &DiffReport, label_a: &str, label_b: &str) -> String {
    let stats = &report.stats;
    let mut msg = String::new();
    msg.push_str(&format!(
        "Summary: {} matches, {} conflicts ({} sat, {} block), {} only in {}, {} only in {}\n",
        stats.matches,
        stats.conflicts,
        stats.sat_conflicts,
        stats.block_conflicts,
        stats.file1_only,
        label_a,
        stats.file2_only,
        label_b
    ));
    for entry in &report.entries {
        if entry.kind() == DiffKind::Match {
            continue;
        }
        let tag = match entry.kind() {
            DiffKind::Match => "MATCH",
            DiffKind::SatConflict => "SAT_CONFLICT",
            DiffKind::BlockConflict => "BLOCK_CONFLICT",
            DiffKind::OnlyInA => "ONLY_IN_A",
            DiffKind::OnlyInB => "ONLY_IN_B",
        };
        msg.push_str(&format!("  {:<15} {}\n", tag, entry.describe(label_a, label_b)));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Claim;
    use std::sync::Arc;

    fn dataset(label: &str, pairs: &[(u64, u64)]) -> KeyedDataset {
        let source: Arc<str> = Arc::from(label);
        KeyedDataset::from_claims(
            label,
            pairs.iter().map(|&(sat, block)| Claim {
                sat,
                block,
                source: source.clone(),
            }),
        )
    }

    #[test]
    fn test_identical_single_entry_matches() {
        let a = dataset("A", &[(100, 5)]);
        let b = dataset("B", &[(100, 5)]);
        let report = diff(&a, &b);
        assert_eq!(report.entries, vec![DiffEntry::Match { sat: 100, block: 5 }]);
        assert_eq!(report.stats.matches, 1);
        assert_eq!(report.stats.conflicts, 0);
        assert!(!report.stats.has_differences());
    }

    #[test]
    fn test_same_sat_different_block() {
        let a = dataset("A", &[(100, 5)]);
        let b = dataset("B", &[(100, 7)]);
        let report = diff(&a, &b);
        assert_eq!(
            report.entries,
            vec![DiffEntry::SatConflict {
                sat: 100,
                block_a: 5,
                block_b: 7
            }]
        );
        assert_eq!(report.stats.conflicts, 1);
    }

    #[test]
    fn test_same_block_different_sat() {
        let a = dataset("A", &[(100, 5)]);
        let b = dataset("B", &[(200, 5)]);
        let report = diff(&a, &b);
        assert!(report.entries.contains(&DiffEntry::BlockConflict {
            block: 5,
            sat_a: 100,
            sat_b: 200
        }));
        assert!(report.entries.contains(&DiffEntry::OnlyInA { sat: 100, block: 5 }));
        assert!(report.entries.contains(&DiffEntry::OnlyInB { sat: 200, block: 5 }));
        assert_eq!(report.stats.block_conflicts, 1);
        assert_eq!(report.stats.file1_only, 1);
        assert_eq!(report.stats.file2_only, 1);
    }

    #[test]
    fn test_inner_collision_still_conflicts() {
        let a = dataset("A", &[(100, 5)]);
        let b = dataset("B", &[(100, 5), (300, 5)]);
        let report = diff(&a, &b);
        assert_eq!(
            report.entries,
            vec![
                DiffEntry::Match { sat: 100, block: 5 },
                DiffEntry::OnlyInB { sat: 300, block: 5 },
                DiffEntry::BlockConflict {
                    block: 5,
                    sat_a: 100,
                    sat_b: 300
                },
            ]
        );
        assert_eq!(report.stats.block_conflicts, 1);
        assert_eq!(report.stats.inner_block_collisions, 1);
    }

    #[test]
    fn test_same_sat_sets_do_not_conflict() {
        let a = dataset("A", &[(100, 5), (300, 5)]);
        let b = dataset("B", &[(300, 5), (100, 5)]);
        let report = diff(&a, &b);
        assert_eq!(report.stats.block_conflicts, 0);
        assert_eq!(report.stats.matches, 2);
        assert_eq!(report.stats.inner_block_collisions, 2);
    }

    #[test]
    fn test_json_entries_carry_description() {
        let a = dataset("left", &[(2, 2)]);
        let b = dataset("right", &[(2, 3)]);
        let value = serde_json::to_value(diff(&a, &b)).unwrap();
        assert_eq!(value["labelA"], "left");
        assert_eq!(value["stats"]["satConflicts"], 1);
        let entry = &value["entries"][0];
        assert_eq!(entry["kind"], "SAT_CONFLICT");
        assert_eq!(entry["block_a"], 2);
        assert_eq!(entry["description"], "sat 2 claims block 2 in left but block 3 in right");
    }

    #[test]
    fn test_entries_sorted_by_key_then_block_conflicts() {
        let a = dataset("A", &[(300, 1), (100, 2), (50, 9)]);
        let b = dataset("B", &[(100, 2), (400, 1), (50, 8)]);
        let report = diff(&a, &b);
        let sats: Vec<Option<u64>> = report.entries.iter().map(|e| e.sat()).collect();
        assert_eq!(sats, vec![Some(50), Some(100), Some(300), Some(400), None]);
        assert_eq!(
            report.entries.last(),
            Some(&DiffEntry::BlockConflict {
                block: 1,
                sat_a: 300,
                sat_b: 400
            })
        );
    }

    #[test]
    fn test_empty_datasets() {
        let report = diff(&dataset("A", &[]), &dataset("B", &[]));
        assert!(report.entries.is_empty());
        assert_eq!(report.stats, DiffStats::default());
    }

    #[test]
    fn test_format_skips_matches() {
        let a = dataset("A", &[(1, 1), (2, 2)]);
        let b = dataset("B", &[(1, 1), (2, 3)]);
        let text = format_diff_report(&diff(&a, &b), "left", "right");
        assert!(text.contains("1 matches"));
        assert!(text.contains("SAT_CONFLICT"));
        assert!(text.contains("sat 2 claims block 2 in left but block 3 in right"));
        assert!(!text.contains("MATCH "));
    }
}
