//! bitmap-reconcile - Registry reconciliation for bitmap claims
//!
//! Compares independently maintained bitmap registries, adjudicates blocks
//! claimed through different sats using the First-is-First rule, and cleans
//! duplicate records out of a single registry.
//!
//! ## Components
//!
//! - [`diff`]: two-way comparison of sat → block datasets
//! - [`batch`]: file-by-file comparison of two registries
//! - [`provider`]: multi-provider blockchain data access with failover
//! - [`resolver`]: First-is-First verdicts for block conflicts
//! - [`duplicates`]: validator → competition → remover pipeline

pub mod batch;
pub mod config;
pub mod diff;
pub mod duplicates;
pub mod error;
pub mod inscription;
pub mod ledger;
/// Log subscriber setup
pub mod logging;
pub mod provider;
pub mod registry;
/// Report files and text rendering
pub mod report;
pub mod resolver;

pub use batch::{BatchReconciler, BatchReport};
pub use config::{PipelineConfig, ProviderConfig, ReconcileConfig, ResolverConfig};
pub use diff::{diff, DiffEntry, DiffReport, DiffStats};
pub use error::{IdentityError, LookupError, ProviderError, RecordError};
pub use inscription::{InscriptionId, InscriptionService, OrdClient};
pub use ledger::{ChainLedger, LedgerPosition, LedgerSource};
pub use registry::KeyedDataset;
pub use resolver::{Conflict, FifResolver, Verdict, Winner};
