//! Provider dialects
//!
//! Providers expose equivalent data with different URL layouts and response
//! shapes. Each dialect knows how to address a request and how to normalize
//! the response into [`TxStatus`] or an ordered txid list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TxStatus;
use crate::error::ProviderError;

/// URL layout and response shape of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// Esplora API (mempool.space, blockstream.info)
    #[default]
    Esplora,
    /// blockchain.info data API
    BlockchainInfo,
}

impl Dialect {
    pub fn tx_url(self, base: &str, txid: &str) -> String {
        match self {
            Dialect::Esplora => format!("{}/tx/{}", base, txid),
            Dialect::BlockchainInfo => format!("{}/rawtx/{}", base, txid),
        }
    }

    /// URL returning the hash of the block at `height` (Esplora only needs
    /// this when the hash is not already known).
    pub fn block_hash_url(self, base: &str, height: u64) -> Option<String> {
        match self {
            Dialect::Esplora => Some(format!("{}/block-height/{}", base, height)),
            Dialect::BlockchainInfo => None,
        }
    }

    pub fn block_txids_url(self, base: &str, height: u64, hash: Option<&str>) -> Option<String> {
        match (self, hash) {
            (Dialect::Esplora, Some(hash)) => Some(format!("{}/block/{}/txids", base, hash)),
            (Dialect::Esplora, None) => None,
            (Dialect::BlockchainInfo, _) => {
                Some(format!("{}/block-height/{}?format=json", base, height))
            }
        }
    }

    pub fn parse_tx(self, provider: &str, body: &str) -> Result<TxStatus, ProviderError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ProviderError::decode(provider, e))?;
        match self {
            Dialect::Esplora => {
                let status = value
                    .get("status")
                    .ok_or_else(|| ProviderError::decode(provider, "tx response has no status"))?;
                let confirmed = status
                    .get("confirmed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if !confirmed {
                    return Ok(TxStatus::unconfirmed());
                }
                Ok(TxStatus {
                    confirmed,
                    block_height: status.get("block_height").and_then(Value::as_u64),
                    block_hash: status
                        .get("block_hash")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            }
            Dialect::BlockchainInfo => {
                if !value.is_object() {
                    return Err(ProviderError::decode(provider, "rawtx response is not an object"));
                }
                match value.get("block_height").and_then(Value::as_u64) {
                    Some(height) => Ok(TxStatus {
                        confirmed: true,
                        block_height: Some(height),
                        block_hash: None,
                    }),
                    None => Ok(TxStatus::unconfirmed()),
                }
            }
        }
    }

    pub fn parse_block_hash(self, provider: &str, body: &str) -> Result<String, ProviderError> {
        let hash = body.trim();
        if hash.len() != 64 || hex::decode(hash).is_err() {
            return Err(ProviderError::decode(
                provider,
                "block-height response is not a block hash",
            ));
        }
        Ok(hash.to_string())
    }

    pub fn parse_block_txids(
        self,
        provider: &str,
        body: &str,
        hash: Option<&str>,
    ) -> Result<Vec<String>, ProviderError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ProviderError::decode(provider, e))?;
        match self {
            Dialect::Esplora => {
                let txids = value
                    .as_array()
                    .ok_or_else(|| {
                        ProviderError::decode(provider, "txids response is not an array")
                    })?;
                txids
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| ProviderError::decode(provider, "txid is not a string"))
                    })
                    .collect()
            }
            Dialect::BlockchainInfo => {
                let blocks = value
                    .get("blocks")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        ProviderError::decode(provider, "block response has no blocks")
                    })?;
                let block = match hash {
                    Some(hash) => blocks
                        .iter()
                        .find(|b| b.get("hash").and_then(Value::as_str) == Some(hash)),
                    None => blocks
                        .iter()
                        .find(|b| b.get("main_chain").and_then(Value::as_bool) == Some(true))
                        .or_else(|| blocks.first()),
                }
                .ok_or_else(|| ProviderError::decode(provider, "no matching block at height"))?;
                let txs = block
                    .get("tx")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ProviderError::decode(provider, "block has no tx list"))?;
                txs.iter()
                    .map(|tx| {
                        tx.get("hash")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .ok_or_else(|| ProviderError::decode(provider, "tx entry has no hash"))
                    })
                    .collect()
            }
        }
    }
}
