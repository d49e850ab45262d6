//! Failover router over the configured providers

use rand::Rng;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::state::{Availability, ProviderState};
use super::transport::{HttpReply, ReqwestTransport, Transport};
use super::{ProviderRequest, ProviderResponse, TxStatus};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Routes requests across providers with retry, failover and caching.
pub struct ProviderRouter<T: Transport = ReqwestTransport> {
    transport: T,
    providers: Vec<ProviderState>,
    /// Providers exhausted during the current run; not retried until the next
    spent: Vec<bool>,
    max_retries: u32,
    backoff: Duration,
    jitter: Duration,
    request_spacing: Duration,
    last_request: Option<Instant>,
    block_txids: FxHashMap<u64, Arc<Vec<String>>>,
}

impl ProviderRouter<ReqwestTransport> {
    /// Create a router using the `reqwest` transport.
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> ProviderRouter<T> {
    pub fn with_transport(config: &ProviderConfig, transport: T) -> Self {
        let now = Instant::now();
        let providers: Vec<ProviderState> = config
            .providers
            .iter()
            .map(|spec| ProviderState::new(spec.clone(), spec.credential(), now))
            .collect();
        Self {
            transport,
            spent: vec![false; providers.len()],
            providers,
            max_retries: config.max_retries,
            backoff: config.backoff(),
            jitter: config.jitter(),
            request_spacing: config.request_spacing(),
            last_request: None,
            block_txids: FxHashMap::default(),
        }
    }

    /// Start a new run: routing restarts from the lowest-index active provider.
    pub fn begin_run(&mut self) {
        self.spent.iter_mut().for_each(|spent| *spent = false);
    }

    pub fn providers(&self) -> &[ProviderState] {
        &self.providers
    }

    /// Name of the provider the next request will try first, if any remain.
    pub fn current_provider(&self) -> Option<&str> {
        let now = Instant::now();
        self.providers
            .iter()
            .zip(&self.spent)
            .find(|(provider, spent)| {
                !**spent
                    && match provider.availability() {
                        Availability::Active => true,
                        Availability::Exhausted { until } => now >= until,
                    }
            })
            .map(|(provider, _)| provider.name())
    }

    /// Number of block txid lists held in the cache.
    pub fn cached_blocks(&self) -> usize {
        self.block_txids.len()
    }

    /// Confirmation status of a transaction.
    pub async fn tx_status(&mut self, txid: &str) -> Result<TxStatus, ProviderError> {
        let request = ProviderRequest::Tx {
            txid: txid.to_string(),
        };
        match self.request(&request).await? {
            ProviderResponse::Tx(status) => Ok(status),
            _ => unreachable!("tx request answered with another response kind"),
        }
    }

    /// Ordered txids of the block at `height`, cached by height.
    pub async fn block_txids(
        &mut self,
        height: u64,
        hash: Option<&str>,
    ) -> Result<Arc<Vec<String>>, ProviderError> {
        if let Some(cached) = self.block_txids.get(&height) {
            tracing::debug!(height, "block txids served from cache");
            return Ok(cached.clone());
        }
        let request = ProviderRequest::BlockTxids {
            height,
            hash: hash.map(str::to_string),
        };
        let txids = match self.request(&request).await? {
            ProviderResponse::BlockTxids(txids) => Arc::new(txids),
            _ => unreachable!("txids request answered with another response kind"),
        };
        self.block_txids.insert(height, txids.clone());
        Ok(txids)
    }

    /// GET `path` relative to the base URL of the first usable provider.
    pub async fn get(&mut self, path: &str) -> Result<HttpReply, ProviderError> {
        let request = ProviderRequest::Raw {
            path: path.to_string(),
        };
        match self.request(&request).await? {
            ProviderResponse::Raw(reply) => Ok(reply),
            _ => unreachable!("raw request answered with another response kind"),
        }
    }

    /// Serve a request from the first usable provider.
    ///
    /// A rate-limit signal exhausts the provider for the rest of the run. Other
    /// provider failures fall through to the next provider for this request
    /// only, so a transient outage does not bench a provider for the run.
    pub async fn request(
        &mut self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        for index in 0..self.providers.len() {
            if self.spent[index] {
                continue;
            }
            if !self.providers[index].is_active(Instant::now()) {
                tracing::debug!(
                    provider = %self.providers[index].name(),
                    "skipping exhausted provider"
                );
                self.spent[index] = true;
                continue;
            }

            match self.try_provider(index, request).await {
                Ok(response) => return Ok(response),
                Err(err @ ProviderError::RateLimited { .. }) => {
                    self.providers[index].exhaust(Instant::now(), &err.to_string());
                    self.spent[index] = true;
                }
                Err(err) if err.triggers_failover() => {
                    tracing::warn!(
                        provider = %self.providers[index].name(),
                        %request,
                        error = %err,
                        "provider failed, failing over"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProviderError::AllProvidersExhausted {
            request: request.to_string(),
        })
    }

    async fn try_provider(
        &mut self,
        index: usize,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let spec = self.providers[index].spec().clone();
        let provider = spec.name.as_str();
        let base = spec.base_url.as_str();

        match request {
            ProviderRequest::Tx { txid } => {
                let reply = self.send_with_retry(index, &spec.dialect.tx_url(base, txid)).await?;
                spec.dialect.parse_tx(provider, &reply.body).map(ProviderResponse::Tx)
            }
            ProviderRequest::BlockTxids { height, hash } => {
                let hash = match (hash.clone(), spec.dialect.block_hash_url(base, *height)) {
                    (Some(hash), _) => Some(hash),
                    (None, Some(url)) => {
                        let reply = self.send_with_retry(index, &url).await?;
                        Some(spec.dialect.parse_block_hash(provider, &reply.body)?)
                    }
                    (None, None) => None,
                };
                let url = spec
                    .dialect
                    .block_txids_url(base, *height, hash.as_deref())
                    .ok_or_else(|| ProviderError::decode(provider, "cannot address block txids"))?;
                let reply = self.send_with_retry(index, &url).await?;
                spec.dialect
                    .parse_block_txids(provider, &reply.body, hash.as_deref())
                    .map(ProviderResponse::BlockTxids)
            }
            ProviderRequest::Raw { path } => {
                let url = format!("{}/{}", base, path.trim_start_matches('/'));
                self.send_with_retry(index, &url).await.map(ProviderResponse::Raw)
            }
        }
    }

    /// One logical HTTP request against one provider.
    ///
    /// Network errors and 5xx are retried up to `max_retries` times with
    /// exponential backoff and jitter. 429 is a rate-limit signal. A 401 with
    /// a credential clears it and retries once unauthenticated; an auth
    /// rejection without a credential is a rate-limit signal.
    async fn send_with_retry(
        &mut self,
        index: usize,
        url: &str,
    ) -> Result<HttpReply, ProviderError> {
        let provider = self.providers[index].name().to_string();
        let mut delay = self.backoff;
        let mut attempt = 0u32;

        loop {
            self.pace().await;
            self.providers[index].record_request(Instant::now());
            let bearer = self.providers[index].credential().map(str::to_string);

            let failure = match self.transport.get(&provider, url, bearer.as_deref()).await {
                Ok(reply) if reply.is_success() => return Ok(reply),
                Ok(reply) if reply.status == 429 => {
                    return Err(ProviderError::RateLimited {
                        provider,
                        reason: "HTTP 429".to_string(),
                    });
                }
                Ok(reply) if reply.status == 401 && bearer.is_some() => {
                    tracing::warn!(
                        provider = %provider,
                        "credential rejected, retrying unauthenticated"
                    );
                    self.providers[index].clear_credential();
                    continue;
                }
                Ok(reply) if reply.status == 401 || reply.status == 403 => {
                    return Err(ProviderError::RateLimited {
                        provider,
                        reason: format!("auth rejected (HTTP {})", reply.status),
                    });
                }
                Ok(reply) if reply.status == 404 => {
                    return Err(ProviderError::NotFound {
                        provider,
                        what: url.to_string(),
                    });
                }
                Ok(reply) if reply.status >= 500 => {
                    ProviderError::network(&provider, format!("HTTP {}", reply.status))
                }
                Ok(reply) => {
                    return Err(ProviderError::network(
                        &provider,
                        format!("HTTP {}", reply.status),
                    ));
                }
                Err(err) => err,
            };

            attempt += 1;
            if attempt > self.max_retries {
                return Err(failure);
            }
            let wait = delay + random_jitter(self.jitter);
            tracing::debug!(
                provider = %provider,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %failure,
                "retrying"
            );
            tokio::time::sleep(wait).await;
            delay = delay.saturating_mul(2);
        }
    }

    /// Keep at least `request_spacing` between successive outbound calls.
    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.request_spacing {
                tokio::time::sleep(self.request_spacing - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
