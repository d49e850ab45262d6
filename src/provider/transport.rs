//! HTTP transport used by the router

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::ProviderError;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A single GET, optionally with a bearer token.
///
/// Implementations report transport failures as `ProviderError::Network`;
/// HTTP error statuses are returned as replies and classified by the router.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, provider: &str, url: &str, bearer: Option<&str>)
        -> Result<HttpReply, ProviderError>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bitmap-reconcile/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        provider: &str,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<HttpReply, ProviderError> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(provider, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(provider, e))?;
        Ok(HttpReply { status, body })
    }
}
