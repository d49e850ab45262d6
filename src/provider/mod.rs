//! Provider Access Layer
//!
//! Routes transaction and block lookups across an ordered list of
//! interchangeable blockchain data providers.
//!
//! ## Behavior
//!
//! - Each provider carries an explicit `ACTIVE | EXHAUSTED` state with a reset
//!   timestamp (see [`state`]).
//! - The router starts a run at the lowest-index active provider and only
//!   moves forward within that run.
//! - Every HTTP attempt retries network errors and 5xx with exponential
//!   backoff plus jitter; a 401 drops the provider credential and retries once
//!   unauthenticated.
//! - Block transaction lists are cached by height for the router's lifetime.

pub mod dialect;
pub mod router;
pub mod state;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use dialect::Dialect;
pub use router::ProviderRouter;
pub use state::{Availability, ProviderState};
pub use transport::{HttpReply, ReqwestTransport, Transport};

/// A lookup the router can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    /// Confirmation status of a transaction
    Tx { txid: String },
    /// Ordered txids of a block. Providers that index by hash use `hash`
    /// when known; the cache is keyed by height.
    BlockTxids { height: u64, hash: Option<String> },
    /// Plain GET of `path` relative to the provider base URL
    Raw { path: String },
}

impl fmt::Display for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderRequest::Tx { txid } => write!(f, "tx {}", txid),
            ProviderRequest::BlockTxids { height, .. } => write!(f, "txids of block {}", height),
            ProviderRequest::Raw { path } => write!(f, "GET {}", path),
        }
    }
}

/// Normalized provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    Tx(TxStatus),
    BlockTxids(Vec<String>),
    Raw(HttpReply),
}

/// Confirmation status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
}

impl TxStatus {
    pub fn unconfirmed() -> Self {
        Self {
            confirmed: false,
            block_height: None,
            block_hash: None,
        }
    }
}
