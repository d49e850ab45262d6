//! Inscription identities and the inscription metadata service
//!
//! The resolver only needs three capabilities from an inscription indexer:
//! the sat an inscription sits on, the inscriptions on a sat, and an
//! inscription's content. [`OrdClient`] provides them over an ord server's
//! JSON endpoints, routed through the provider layer for retry and failover.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::config::{ProviderConfig, ProviderSpec};
use crate::error::{IdentityError, ProviderError};
use crate::provider::{Dialect, ProviderRouter, ReqwestTransport, Transport};

/// `<txid>i<index>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InscriptionId {
    txid: String,
    index: u32,
}

impl InscriptionId {
    /// Reveal transaction id.
    pub fn txid(&self) -> &str {
        &self.txid
    }

    /// Position of the inscription within its reveal transaction.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl FromStr for InscriptionId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (txid, index) = trimmed
            .rsplit_once('i')
            .ok_or_else(|| IdentityError::MissingSeparator(s.to_string()))?;
        if txid.len() != 64 || hex::decode(txid).is_err() {
            return Err(IdentityError::InvalidTxid(s.to_string()));
        }
        let index = index
            .parse::<u32>()
            .map_err(|_| IdentityError::InvalidIndex(s.to_string()))?;
        Ok(Self {
            txid: txid.to_ascii_lowercase(),
            index,
        })
    }
}

impl TryFrom<String> for InscriptionId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InscriptionId> for String {
    fn from(id: InscriptionId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for InscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}i{}", self.txid, self.index)
    }
}

/// Content a valid bitmap claim for `block` must carry.
pub fn bitmap_content(block: u64) -> String {
    format!("{}.bitmap", block)
}

/// Inscription metadata capability used by the resolver.
#[async_trait]
pub trait InscriptionService: Send {
    /// Sat the inscription currently sits on, `None` when unbound/unknown.
    async fn sat_for_inscription(
        &mut self,
        id: &InscriptionId,
    ) -> Result<Option<u64>, ProviderError>;

    /// Inscriptions on a sat, oldest first.
    async fn inscriptions_for_sat(&mut self, sat: u64) -> Result<Vec<InscriptionId>, ProviderError>;

    /// Raw content of an inscription.
    async fn content(&mut self, id: &InscriptionId) -> Result<Vec<u8>, ProviderError>;

    /// Start of a resolution run.
    fn begin_run(&mut self) {}
}

/// [`InscriptionService`] over an ord server's recursive JSON endpoints.
pub struct OrdClient<T: Transport = ReqwestTransport> {
    router: ProviderRouter<T>,
    max_pages: u32,
}

fn ord_providers(config: &ProviderConfig, ord_url: &str) -> ProviderConfig {
    ProviderConfig {
        providers: vec![ProviderSpec::new("ord", ord_url, Dialect::Esplora)],
        ..config.clone()
    }
}

impl OrdClient<ReqwestTransport> {
    pub fn new(ord_url: &str, config: &ProviderConfig, max_pages: u32) -> anyhow::Result<Self> {
        let router = ProviderRouter::new(&ord_providers(config, ord_url))?;
        Ok(Self { router, max_pages })
    }
}

impl<T: Transport> OrdClient<T> {
    pub fn with_transport(
        ord_url: &str,
        config: &ProviderConfig,
        max_pages: u32,
        transport: T,
    ) -> Self {
        let router = ProviderRouter::with_transport(&ord_providers(config, ord_url), transport);
        Self { router, max_pages }
    }

    async fn get_json(&mut self, path: &str) -> Result<Value, ProviderError> {
        let reply = self.router.get(path).await?;
        serde_json::from_str(&reply.body).map_err(|e| ProviderError::decode("ord", e))
    }
}

#[async_trait]
impl<T: Transport> InscriptionService for OrdClient<T> {
    async fn sat_for_inscription(
        &mut self,
        id: &InscriptionId,
    ) -> Result<Option<u64>, ProviderError> {
        let value = self.get_json(&format!("/r/inscription/{}", id)).await?;
        match value.get("sat") {
            Some(Value::Null) | None => Ok(None),
            Some(sat) => sat
                .as_u64()
                .map(Some)
                .ok_or_else(|| ProviderError::decode("ord", "sat is not an integer")),
        }
    }

    async fn inscriptions_for_sat(
        &mut self,
        sat: u64,
    ) -> Result<Vec<InscriptionId>, ProviderError> {
        let mut ids = Vec::new();
        for page in 0..self.max_pages.max(1) {
            let value = self.get_json(&format!("/r/sat/{}/{}", sat, page)).await?;
            let page_ids = value
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| ProviderError::decode("ord", "sat response has no ids"))?;
            for raw in page_ids {
                match raw.as_str().map(str::parse::<InscriptionId>) {
                    Some(Ok(id)) => ids.push(id),
                    _ => tracing::warn!(sat, id = %raw, "skipping malformed inscription id"),
                }
            }
            if !value.get("more").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(ids);
            }
        }
        tracing::warn!(sat, pages = self.max_pages, "sat has more inscriptions than page limit");
        Ok(ids)
    }

    async fn content(&mut self, id: &InscriptionId) -> Result<Vec<u8>, ProviderError> {
        let reply = self.router.get(&format!("/content/{}", id)).await?;
        Ok(reply.body.into_bytes())
    }

    fn begin_run(&mut self) {
        self.router.begin_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HttpReply;

    const TXID: &str = "6fb976ab49dcec017f1e201e84395983204ae1a7c2abf7ced0a85d692e442799";

    #[test]
    fn test_parse_inscription_id() {
        let id: InscriptionId = format!("{}i0", TXID).parse().unwrap();
        assert_eq!(id.txid(), TXID);
        assert_eq!(id.index(), 0);
        assert_eq!(id.to_string(), format!("{}i0", TXID));

        let upper: InscriptionId = format!("{}i12", TXID.to_uppercase()).parse().unwrap();
        assert_eq!(upper.txid(), TXID);
        assert_eq!(upper.index(), 12);
    }

    #[test]
    fn test_reject_malformed_ids() {
        assert_eq!(
            "abc".parse::<InscriptionId>(),
            Err(IdentityError::MissingSeparator("abc".into()))
        );
        assert!(matches!(
            "abci0".parse::<InscriptionId>(),
            Err(IdentityError::InvalidTxid(_))
        ));
        assert!(matches!(
            format!("{}ix", TXID).parse::<InscriptionId>(),
            Err(IdentityError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let id: InscriptionId = format!("{}i1", TXID).parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}i1\"", TXID));
        let back: InscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<InscriptionId>("\"nope\"").is_err());
    }

    #[test]
    fn test_bitmap_content() {
        assert_eq!(bitmap_content(800000), "800000.bitmap");
    }

    struct OrdStub;

    #[async_trait]
    impl Transport for OrdStub {
        async fn get(
            &self,
            _provider: &str,
            url: &str,
            _bearer: Option<&str>,
        ) -> Result<HttpReply, ProviderError> {
            let path = url.trim_start_matches("https://ord.example");
            let body = match path {
                p if p.starts_with("/r/inscription/") => r#"{"sat": 2000}"#.to_string(),
                "/r/sat/2000/0" => format!(r#"{{"ids": ["{}i0", "bogus"], "more": true}}"#, TXID),
                "/r/sat/2000/1" => format!(r#"{{"ids": ["{}i1"], "more": false}}"#, TXID),
                p if p.starts_with("/content/") => "800000.bitmap".to_string(),
                _ => return Ok(HttpReply::new(404, "")),
            };
            Ok(HttpReply::new(200, body))
        }
    }

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            providers: Vec::new(),
            max_retries: 0,
            backoff_ms: 0,
            jitter_ms: 0,
            request_spacing_ms: 0,
            timeout_secs: 1,
        }
    }

    fn ord_client() -> OrdClient<OrdStub> {
        OrdClient::with_transport("https://ord.example", &test_config(), 5, OrdStub)
    }

    /// Fails the first `outage` calls with 503, then behaves like [`OrdStub`].
    struct FlakyOrd {
        outage: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Transport for FlakyOrd {
        async fn get(
            &self,
            provider: &str,
            url: &str,
            bearer: Option<&str>,
        ) -> Result<HttpReply, ProviderError> {
            use std::sync::atomic::Ordering;
            let remaining = self.outage.load(Ordering::SeqCst);
            if remaining > 0 {
                self.outage.store(remaining - 1, Ordering::SeqCst);
                return Ok(HttpReply::new(503, ""));
            }
            OrdStub.get(provider, url, bearer).await
        }
    }

    #[tokio::test]
    async fn test_ord_client_pages_and_content() {
        let mut ord = ord_client();
        let id: InscriptionId = format!("{}i0", TXID).parse().unwrap();
        assert_eq!(ord.sat_for_inscription(&id).await.unwrap(), Some(2000));

        let ids = ord.inscriptions_for_sat(2000).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].index(), 1);

        assert_eq!(ord.content(&id).await.unwrap(), b"800000.bitmap".to_vec());
    }

    #[tokio::test]
    async fn test_ord_client_unknown_sat_is_not_found() {
        let mut ord = ord_client();
        let err = ord.inscriptions_for_sat(1).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ord_recovers_after_transient_outage() {
        let transport = FlakyOrd {
            outage: std::sync::atomic::AtomicUsize::new(1),
        };
        let mut ord =
            OrdClient::with_transport("https://ord.example", &test_config(), 5, transport);
        let id: InscriptionId = format!("{}i0", TXID).parse().unwrap();

        assert!(ord.sat_for_inscription(&id).await.is_err());
        assert_eq!(ord.sat_for_inscription(&id).await.unwrap(), Some(2000));
        assert_eq!(ord.content(&id).await.unwrap(), b"800000.bitmap".to_vec());
    }
}
