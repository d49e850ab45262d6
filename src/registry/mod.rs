//! Registry partition records and keyed datasets
//!
//! A registry partition is a JSON array of records in one of two shapes:
//! canonical `{block, iD, sat}` and lookup `{sat, block}`. Readers accept
//! `block` and `blockheight` interchangeably, and numbers may be encoded as
//! decimal strings.

pub mod source;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::RecordError;

pub use source::{filter_by_pattern, open_source, LocalRegistry, RegistrySource, RemoteRegistry};

/// Satoshi ordinal
pub type SatNumber = u64;
/// Block height
pub type BlockHeight = u64;

/// Field names accepted for the block height.
pub const BLOCK_FIELDS: &[&str] = &["block", "blockheight"];
/// Field names accepted for the sat.
pub const SAT_FIELDS: &[&str] = &["sat"];
/// Field names accepted for the inscription id.
pub const ID_FIELDS: &[&str] = &["iD", "id", "inscriptionId"];

fn numeric_field(obj: &Map<String, Value>, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| match obj.get(*name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        obj.get(*name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// One registry record with aliased fields resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub block: Option<BlockHeight>,
    pub sat: Option<SatNumber>,
    pub id: Option<String>,
}

impl RegistryRecord {
    /// Resolve a JSON value. Returns `None` when the value is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            block: numeric_field(obj, BLOCK_FIELDS),
            sat: numeric_field(obj, SAT_FIELDS),
            id: string_field(obj, ID_FIELDS),
        })
    }

    /// Whether this record describes the given `(block, sat, id)` triple.
    /// An id of `None` on either side matches any id.
    pub fn matches(&self, block: BlockHeight, sat: SatNumber, id: Option<&str>) -> bool {
        if self.block != Some(block) || self.sat != Some(sat) {
            return false;
        }
        match (id, self.id.as_deref()) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        }
    }
}

/// Parse a partition file into its raw records.
///
/// Fails with a shape error when the text is not a JSON array.
pub fn parse_records(source_id: &str, text: &str) -> Result<Vec<Value>, RecordError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RecordError::shape(source_id, format!("invalid JSON: {}", e)))?;
    match value {
        Value::Array(records) => Ok(records),
        other => Err(RecordError::shape(
            source_id,
            format!("expected an array of records, found {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Atomic unit compared across two datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub sat: SatNumber,
    pub block: BlockHeight,
    pub source: Arc<str>,
}

/// Value side of a dataset entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub block: BlockHeight,
    pub source: Arc<str>,
}

/// Sat → block mapping with unique keys.
#[derive(Debug, Clone, Default)]
pub struct KeyedDataset {
    label: String,
    entries: FxHashMap<SatNumber, DatasetEntry>,
}

impl KeyedDataset {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: FxHashMap::default(),
        }
    }

    /// Build a dataset from claims. Repeated keys keep their first claim.
    pub fn from_claims(label: impl Into<String>, claims: impl IntoIterator<Item = Claim>) -> Self {
        let mut dataset = Self::new(label);
        for claim in claims {
            dataset.insert(claim);
        }
        dataset
    }

    /// Parse a partition file into a dataset.
    ///
    /// A non-array input is a shape error. Records without an accepted key or
    /// value, non-object records and repeated keys are skipped and returned
    /// as field errors so the caller can log them.
    pub fn from_json(
        label: impl Into<String>,
        source_id: &str,
        text: &str,
    ) -> Result<(Self, Vec<RecordError>), RecordError> {
        let records = parse_records(source_id, text)?;
        Ok(Self::from_records(label, source_id, &records))
    }

    /// Build a dataset from already-parsed records. Skipped records are
    /// returned as field errors.
    pub fn from_records(
        label: impl Into<String>,
        source_id: &str,
        records: &[Value],
    ) -> (Self, Vec<RecordError>) {
        let source: Arc<str> = Arc::from(source_id);
        let mut dataset = Self::new(label);
        let mut skipped = Vec::new();

        for (index, value) in records.iter().enumerate() {
            let Some(record) = RegistryRecord::from_value(value) else {
                skipped.push(RecordError::field(source_id, index, "record is not an object"));
                continue;
            };
            let (sat, block) = match (record.sat, record.block) {
                (Some(sat), Some(block)) => (sat, block),
                (None, Some(_)) => {
                    skipped.push(RecordError::field(source_id, index, "missing sat"));
                    continue;
                }
                (Some(_), None) => {
                    skipped.push(RecordError::field(source_id, index, "missing block/blockheight"));
                    continue;
                }
                (None, None) => {
                    skipped.push(RecordError::field(
                        source_id,
                        index,
                        "missing both sat and block/blockheight",
                    ));
                    continue;
                }
            };
            let claim = Claim {
                sat,
                block,
                source: source.clone(),
            };
            if !dataset.insert(claim) {
                skipped.push(RecordError::field(
                    source_id,
                    index,
                    format!("sat {} repeated within dataset, keeping first", sat),
                ));
            }
        }

        (dataset, skipped)
    }

    /// Insert a claim; returns `false` when the key is already present.
    pub fn insert(&mut self, claim: Claim) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry(claim.sat) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(DatasetEntry {
                    block: claim.block,
                    source: claim.source,
                });
                true
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self, sat: SatNumber) -> Option<&DatasetEntry> {
        self.entries.get(&sat)
    }

    pub fn contains(&self, sat: SatNumber) -> bool {
        self.entries.contains_key(&sat)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SatNumber, &DatasetEntry)> {
        self.entries.iter().map(|(sat, entry)| (*sat, entry))
    }

    /// Block → sats index, each sat list ascending. The number of claims
    /// beyond the first for any block is returned alongside.
    pub fn inverse(&self) -> (FxHashMap<BlockHeight, Vec<SatNumber>>, usize) {
        let mut inverse: FxHashMap<BlockHeight, Vec<SatNumber>> = FxHashMap::default();
        for (sat, entry) in self.iter() {
            inverse.entry(entry.block).or_default().push(sat);
        }
        let mut collisions = 0usize;
        for sats in inverse.values_mut() {
            sats.sort_unstable();
            collisions += sats.len() - 1;
        }
        (inverse, collisions)
    }
}
