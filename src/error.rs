//! Error taxonomy
//!
//! Record-level errors are recoverable (the record or file is skipped and the
//! run continues), provider errors are recovered by retry and failover, and
//! only entry-point failures (missing paths, malformed reports) are fatal.
//! Entry points wrap these in `anyhow` with context.

use thiserror::Error;

/// Problems with the shape of a registry file or one of its records.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The input is not a JSON array of records. Aborts the current file only.
    #[error("shape error in {source_id}: {reason}")]
    Shape { source_id: String, reason: String },

    /// A single record is missing a required field. The record is skipped.
    #[error("field error in {source_id} record #{index}: {reason}")]
    Field {
        source_id: String,
        index: usize,
        reason: String,
    },
}

impl RecordError {
    pub fn shape(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::Shape {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn field(source_id: impl Into<String>, index: usize, reason: impl Into<String>) -> Self {
        RecordError::Field {
            source_id: source_id.into(),
            index,
            reason: reason.into(),
        }
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, RecordError::Shape { .. })
    }
}

/// Provider-level failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure or a non-success status that survived retries.
    #[error("network error from {provider}: {reason}")]
    Network { provider: String, reason: String },

    /// HTTP 429, an auth rejection, or a spent request quota.
    #[error("rate limited by {provider}: {reason}")]
    RateLimited { provider: String, reason: String },

    /// The response did not have the shape the provider's dialect promises.
    #[error("unexpected response from {provider}: {reason}")]
    Decode { provider: String, reason: String },

    /// The resource does not exist on the provider (HTTP 404).
    #[error("{what} not found on {provider}")]
    NotFound { provider: String, what: String },

    /// Transaction has no block yet. Callers map this to a null ledger position.
    #[error("transaction {txid} is unconfirmed")]
    Unconfirmed { txid: String },

    /// Every configured provider is exhausted or failing for this request.
    #[error("all providers exhausted for {request}")]
    AllProvidersExhausted { request: String },
}

impl ProviderError {
    pub fn network(provider: impl Into<String>, reason: impl ToString) -> Self {
        ProviderError::Network {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(provider: impl Into<String>, reason: impl ToString) -> Self {
        ProviderError::Decode {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that should move the router on to the next provider rather
    /// than being returned to the caller.
    pub fn triggers_failover(&self) -> bool {
        matches!(
            self,
            ProviderError::Network { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Decode { .. }
        )
    }
}

/// A registry partition is missing an expected key, or could not be read.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("block {block} not found in {file} ({source_id})")]
    NotFound {
        source_id: String,
        file: String,
        block: u64,
    },

    #[error("failed to fetch {file} from {source_id}: {reason}")]
    Fetch {
        source_id: String,
        file: String,
        reason: String,
    },
}

/// Malformed inscription identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("inscription id {0:?} is missing the 'i' separator")]
    MissingSeparator(String),

    #[error("inscription id {0:?} has an invalid txid")]
    InvalidTxid(String),

    #[error("inscription id {0:?} has an invalid index")]
    InvalidIndex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_classification() {
        assert!(ProviderError::network("mempool", "timeout").triggers_failover());
        assert!(ProviderError::RateLimited {
            provider: "mempool".into(),
            reason: "429".into()
        }
        .triggers_failover());
        assert!(!ProviderError::Unconfirmed { txid: "ab".into() }.triggers_failover());
        assert!(!ProviderError::NotFound {
            provider: "mempool".into(),
            what: "tx".into()
        }
        .triggers_failover());
    }

    #[test]
    fn test_record_error_messages_carry_context() {
        let err = RecordError::field("a/0-9999.json", 4, "missing sat");
        assert_eq!(
            err.to_string(),
            "field error in a/0-9999.json record #4: missing sat"
        );
        assert!(!err.is_shape());
        assert!(RecordError::shape("x", "not an array").is_shape());
    }
}
