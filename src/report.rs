//! Report files
//!
//! Every report is written atomically: serialized into a temporary file in
//! the destination directory, then renamed over the target. Text reports are
//! rendered into any `std::io::Write` so callers choose the sink.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::resolver::{verdict_histogram, Verdict};

/// RFC 3339 timestamp stamped into JSON reports.
pub fn generated_at() -> String {
    Utc::now().to_rfc3339()
}

/// `{dir}/{prefix}-{YYYYmmddTHHMMSSmmmZ}.{ext}`, with a `-N` counter before
/// the extension when that name is already taken.
pub fn timestamped_path(dir: &Path, prefix: &str, ext: &str) -> PathBuf {
    timestamped_path_at(dir, prefix, ext, Utc::now())
}

fn timestamped_path_at(dir: &Path, prefix: &str, ext: &str, at: DateTime<Utc>) -> PathBuf {
    let stem = format!("{}-{}", prefix, at.format("%Y%m%dT%H%M%S%3fZ"));
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut counter = 1u32;
    while path.exists() {
        path = dir.join(format!("{}-{}.{}", stem, counter, ext));
        counter += 1;
    }
    path
}

/// Replace `path` with `data` without ever exposing a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in: {}", dir.display()))?;
    temp.write_all(data)
        .with_context(|| format!("Failed to write temp file for: {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file for: {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value).context("Failed to serialize report")?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Read a JSON report written by an earlier stage.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Malformed report: {}", path.display()))
}

/// JSON twin of the verdict text report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictReport {
    pub generated_at: String,
    pub label_a: String,
    pub label_b: String,
    pub summary: BTreeMap<String, usize>,
    pub verdicts: Vec<Verdict>,
}

impl VerdictReport {
    pub fn new(label_a: &str, label_b: &str, verdicts: Vec<Verdict>) -> Self {
        let summary = verdict_histogram(&verdicts)
            .into_iter()
            .map(|(winner, count)| (winner.to_string(), count))
            .collect();
        Self {
            generated_at: generated_at(),
            label_a: label_a.to_string(),
            label_b: label_b.to_string(),
            summary,
            verdicts,
        }
    }
}

/// Render verdicts as text: one block per conflict, then the histogram.
pub fn write_verdict_text<W: Write>(out: &mut W, report: &VerdictReport) -> std::io::Result<()> {
    writeln!(out, "FiF verdicts ({} vs {})", report.label_a, report.label_b)?;
    writeln!(out, "Generated: {}", report.generated_at)?;
    writeln!(out)?;

    for verdict in &report.verdicts {
        writeln!(out, "Block {}: {}", verdict.block, verdict.winner)?;
        if let Some(id) = &verdict.winning_identity {
            writeln!(out, "  identity:    {}", id)?;
        }
        if let (Some(winning), Some(losing)) = (verdict.winning_sat, verdict.losing_sat) {
            writeln!(out, "  winning sat: {}", winning)?;
            writeln!(out, "  losing sat:  {}", losing)?;
        }
        writeln!(out, "  reason:      {}", verdict.reason)?;
    }

    writeln!(out)?;
    writeln!(out, "Summary ({} conflicts):", report.verdicts.len())?;
    for (winner, count) in verdict_histogram(&report.verdicts) {
        writeln!(out, "  {:<8} {}", winner.to_string(), count)?;
    }
    Ok(())
}
