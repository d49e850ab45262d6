//! Batch reconciliation between two local registry directories

use bitmap_reconcile::batch::{format_batch_report, BatchReconciler};
use bitmap_reconcile::config::{ReconcileConfig, RegistryLocation};
use bitmap_reconcile::registry::open_source;
use std::path::Path;
use std::time::Duration;

const TX_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const TX_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn write(dir: &Path, name: &str, text: &str) {
    std::fs::write(dir.join(name), text).unwrap();
}

async fn run(a: &Path, b: &Path) -> bitmap_reconcile::batch::BatchReport {
    let mut config = ReconcileConfig::new(
        RegistryLocation::Local(a.to_path_buf()),
        RegistryLocation::Local(b.to_path_buf()),
    );
    config.label_a = "left".to_string();
    config.label_b = "right".to_string();
    let source_a = open_source(&config.source_a, &config.label_a, Duration::from_secs(1)).unwrap();
    let source_b = open_source(&config.source_b, &config.label_b, Duration::from_secs(1)).unwrap();
    BatchReconciler::new(source_a, source_b, config).run().await.unwrap()
}

#[tokio::test]
async fn conflicts_across_partitions_carry_identities() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();

    write(
        a.path(),
        "0-9999.json",
        &format!(r#"[{{"block": 5, "iD": "{}i0", "sat": 100}}, {{"block": 6, "sat": 600}}]"#, TX_A),
    );
    write(
        b.path(),
        "0-9999.json",
        &format!(
            r#"[{{"blockheight": "5", "id": "{}i3", "sat": "200"}}, {{"block": 6, "sat": 600}}]"#,
            TX_B
        ),
    );
    write(a.path(), "10000-19999.json", r#"[{"block": 10001, "sat": 7}]"#);
    write(b.path(), "10000-19999.json", r#"[{"block": 10002, "sat": 7}]"#);
    write(b.path(), "20000-29999.json", "[]");
    write(a.path(), "notes.txt", "ignored");

    let report = run(a.path(), b.path()).await;

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.stats.matches, 1);
    assert_eq!(report.stats.sat_conflicts, 1);
    assert_eq!(report.stats.block_conflicts, 1);
    assert_eq!(report.stats.conflicts, 2);
    assert!(report.exclusive_files.only_in_a.is_empty());
    assert_eq!(report.exclusive_files.only_in_b, vec!["20000-29999.json"]);

    let conflicts = report.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].block, 5);
    assert_eq!(conflicts[0].sat_a, 100);
    assert_eq!(conflicts[0].sat_b, 200);
    assert_eq!(conflicts[0].claimant_a.as_ref().map(|id| id.index()), Some(0));
    assert_eq!(conflicts[0].claimant_b.as_ref().map(|id| id.index()), Some(3));

    let text = format_batch_report(&report);
    assert!(text.contains("20000-29999.json only in right"));
    assert!(report.has_differences());
}

#[tokio::test]
async fn identical_registries_are_clean() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    for dir in [a.path(), b.path()] {
        write(dir, "0-9999.json", r#"[{"block": 1, "sat": 10}, {"block": 2, "sat": 20}]"#);
    }
    let report = run(a.path(), b.path()).await;
    assert_eq!(report.stats.matches, 2);
    assert!(!report.has_differences());
    assert!(report.block_conflicts.is_empty());
}

#[tokio::test]
async fn malformed_partition_is_skipped_not_fatal() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write(a.path(), "0-9999.json", r#"{"block": 1}"#);
    write(b.path(), "0-9999.json", r#"[{"block": 1, "sat": 10}]"#);
    write(a.path(), "10000-19999.json", r#"[{"block": 10000, "sat": 1}]"#);
    write(b.path(), "10000-19999.json", r#"[{"block": 10000, "sat": 1}]"#);

    let report = run(a.path(), b.path()).await;
    assert_eq!(report.skipped_files.len(), 1);
    assert_eq!(report.skipped_files[0].file, "0-9999.json");
    assert_eq!(report.stats.matches, 1);
}

#[test]
fn missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let location = RegistryLocation::Local(dir.path().join("missing"));
    assert!(open_source(&location, "A", Duration::from_secs(1)).is_err());
}
