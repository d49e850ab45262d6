//! Ledger positions
//!
//! A claim's ledger position is the confirmed height of its reveal
//! transaction and that transaction's index within the block. An unconfirmed
//! transaction resolves to a null position rather than an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::{ProviderRouter, ReqwestTransport, Transport};

/// Canonical chain-order location of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPosition {
    pub block_height: Option<u64>,
    pub block_position: Option<u64>,
}

impl LedgerPosition {
    pub fn confirmed(height: u64, position: u64) -> Self {
        Self {
            block_height: Some(height),
            block_position: Some(position),
        }
    }

    pub fn unconfirmed() -> Self {
        Self::default()
    }

    pub fn is_confirmed(&self) -> bool {
        self.block_height.is_some()
    }
}

/// Source of ledger positions for transactions.
#[async_trait]
pub trait LedgerSource: Send {
    async fn ledger_position(&mut self, txid: &str) -> Result<LedgerPosition, ProviderError>;

    /// Start of a resolution run.
    fn begin_run(&mut self) {}
}

/// [`LedgerSource`] backed by the provider router.
pub struct ChainLedger<T: Transport = ReqwestTransport> {
    router: ProviderRouter<T>,
}

impl<T: Transport> ChainLedger<T> {
    pub fn new(router: ProviderRouter<T>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &ProviderRouter<T> {
        &self.router
    }
}

#[async_trait]
impl<T: Transport> LedgerSource for ChainLedger<T> {
    async fn ledger_position(&mut self, txid: &str) -> Result<LedgerPosition, ProviderError> {
        let status = self.router.tx_status(txid).await?;
        let height = match (status.confirmed, status.block_height) {
            (true, Some(height)) => height,
            _ => {
                let unconfirmed = ProviderError::Unconfirmed {
                    txid: txid.to_string(),
                };
                tracing::info!(txid, "{}; using a null ledger position", unconfirmed);
                return Ok(LedgerPosition::unconfirmed());
            }
        };

        let txids = self
            .router
            .block_txids(height, status.block_hash.as_deref())
            .await?;
        match txids.iter().position(|t| t.eq_ignore_ascii_case(txid)) {
            Some(position) => Ok(LedgerPosition::confirmed(height, position as u64)),
            None => {
                tracing::warn!(txid, height, "transaction missing from its block's txid list");
                Ok(LedgerPosition {
                    block_height: Some(height),
                    block_position: None,
                })
            }
        }
    }

    fn begin_run(&mut self) {
        self.router.begin_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ProviderSpec};
    use crate::provider::{Dialect, HttpReply};
    use std::sync::Mutex;

    const HASH: &str = "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054";

    struct FixedTransport {
        replies: Mutex<Vec<(&'static str, HttpReply)>>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn get(
            &self,
            provider: &str,
            url: &str,
            _bearer: Option<&str>,
        ) -> Result<HttpReply, ProviderError> {
            let replies = self.replies.lock().unwrap();
            replies
                .iter()
                .find(|(needle, _)| url.contains(needle))
                .map(|(_, reply)| reply.clone())
                .ok_or_else(|| ProviderError::network(provider, "no route"))
        }
    }

    fn ledger(replies: Vec<(&'static str, HttpReply)>) -> ChainLedger<FixedTransport> {
        let config = ProviderConfig {
            providers: vec![ProviderSpec::new("m", "https://m.example/api", Dialect::Esplora)],
            max_retries: 0,
            backoff_ms: 0,
            jitter_ms: 0,
            request_spacing_ms: 0,
            timeout_secs: 1,
        };
        let transport = FixedTransport {
            replies: Mutex::new(replies),
        };
        ChainLedger::new(ProviderRouter::with_transport(&config, transport))
    }

    #[tokio::test]
    async fn test_confirmed_position() {
        let tx = format!(
            r#"{{"status":{{"confirmed":true,"block_height":800000,"block_hash":"{}"}}}}"#,
            HASH
        );
        let mut ledger = ledger(vec![
            ("/tx/", HttpReply::new(200, tx)),
            ("/txids", HttpReply::new(200, r#"["aa","bb","cc","dd"]"#)),
        ]);
        let position = ledger.ledger_position("cc").await.unwrap();
        assert_eq!(position, LedgerPosition::confirmed(800000, 2));
    }

    #[tokio::test]
    async fn test_unconfirmed_is_null_position() {
        let mut ledger = ledger(vec![(
            "/tx/",
            HttpReply::new(200, r#"{"status":{"confirmed":false}}"#),
        )]);
        let position = ledger.ledger_position("cc").await.unwrap();
        assert_eq!(position, LedgerPosition::unconfirmed());
        assert!(!position.is_confirmed());
    }

    #[tokio::test]
    async fn test_missing_from_block_list_has_null_position() {
        let tx = format!(
            r#"{{"status":{{"confirmed":true,"block_height":5,"block_hash":"{}"}}}}"#,
            HASH
        );
        let mut ledger = ledger(vec![
            ("/tx/", HttpReply::new(200, tx)),
            ("/txids", HttpReply::new(200, r#"["aa"]"#)),
        ]);
        let position = ledger.ledger_position("zz").await.unwrap();
        assert_eq!(position.block_height, Some(5));
        assert_eq!(position.block_position, None);
    }
}
