//! Run configuration
//!
//! Every component receives its configuration record at construction. The CLI
//! assembles these from flags, environment variables (optionally loaded from
//! `.env`) and a provider list in JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::provider::Dialect;

/// Default number of blocks per registry partition file.
pub const DEFAULT_PARTITION_SIZE: u64 = 10_000;

/// Default partition filename template.
pub const DEFAULT_PARTITION_TEMPLATE: &str = "{start}-{end}.json";

/// How block heights map onto partition files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScheme {
    /// Blocks per partition
    pub size: u64,
    /// Filename template with `{start}` and `{end}` placeholders
    pub template: String,
}

impl Default for PartitionScheme {
    fn default() -> Self {
        Self {
            size: DEFAULT_PARTITION_SIZE,
            template: DEFAULT_PARTITION_TEMPLATE.to_string(),
        }
    }
}

impl PartitionScheme {
    /// Inclusive block range of the partition covering `block`.
    pub fn range_for(&self, block: u64) -> (u64, u64) {
        let size = self.size.max(1);
        let start = (block / size) * size;
        (start, start.saturating_add(size - 1))
    }

    /// Filename of the partition covering `block`.
    pub fn file_for(&self, block: u64) -> String {
        let (start, end) = self.range_for(block);
        self.template
            .replace("{start}", &start.to_string())
            .replace("{end}", &end.to_string())
    }
}

/// Where a registry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryLocation {
    /// Directory of partition files
    Local(PathBuf),
    /// URL of a JSON listing of `{name, download_url}` entries
    Remote(String),
}

impl FromStr for RegistryLocation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(RegistryLocation::Remote(s.to_string()))
        } else {
            Ok(RegistryLocation::Local(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for RegistryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryLocation::Local(path) => write!(f, "{}", path.display()),
            RegistryLocation::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Configuration for comparing two registries.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub source_a: RegistryLocation,
    pub source_b: RegistryLocation,
    /// Label used for side A in reports
    pub label_a: String,
    /// Label used for side B in reports
    pub label_b: String,
    /// Glob matched against partition filenames in both sources
    pub pattern: String,
    pub partition: PartitionScheme,
    /// Directory that receives timestamped reports
    pub report_dir: PathBuf,
    /// Timeout for remote registry fetches
    pub fetch_timeout: Duration,
}

impl ReconcileConfig {
    pub fn new(source_a: RegistryLocation, source_b: RegistryLocation) -> Self {
        Self {
            source_a,
            source_b,
            label_a: "A".to_string(),
            label_b: "B".to_string(),
            pattern: "*.json".to_string(),
            partition: PartitionScheme::default(),
            report_dir: PathBuf::from("reports"),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// One blockchain data provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    /// Base URL without trailing slash, e.g. `https://mempool.space/api`
    pub base_url: String,
    #[serde(default)]
    pub dialect: Dialect,
    /// Environment variable holding a bearer token for this provider
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Requests allowed per quota window (unlimited when absent)
    #[serde(default)]
    pub quota: Option<u32>,
    /// Length of the quota window in seconds
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
}

fn default_quota_window_secs() -> u64 {
    3600
}

impl ProviderSpec {
    pub fn new(name: &str, base_url: &str, dialect: Dialect) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dialect,
            credential_env: None,
            quota: None,
            quota_window_secs: default_quota_window_secs(),
        }
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    /// Read the credential from the configured environment variable.
    pub fn credential(&self) -> Option<String> {
        self.credential_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.trim().is_empty())
    }
}

/// Provider access layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Providers in failover order
    pub providers: Vec<ProviderSpec>,
    /// Retries per HTTP attempt on network errors and 5xx
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound of the random jitter added to each backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Fixed pause between successive provider calls
    #[serde(default = "default_spacing_ms")]
    pub request_spacing_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_spacing_ms() -> u64 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderSpec::new("mempool", "https://mempool.space/api", Dialect::Esplora),
                ProviderSpec::new("blockstream", "https://blockstream.info/api", Dialect::Esplora),
                ProviderSpec::new(
                    "blockchain-info",
                    "https://blockchain.info",
                    Dialect::BlockchainInfo,
                ),
            ],
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            request_spacing_ms: default_spacing_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    /// Load a provider list from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config: {}", path.display()))?;
        let config: ProviderConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse provider config: {}", path.display()))?;
        if config.providers.is_empty() {
            anyhow::bail!("Provider config {} lists no providers", path.display());
        }
        Ok(config)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// FiF resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base URL of the ord server used for sat and content lookups
    pub ord_url: String,
    /// Pause between successive conflict resolutions
    pub resolution_spacing: Duration,
    /// Upper bound on `/r/sat` pages read when searching a sat's inscriptions
    pub max_sat_pages: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ord_url: "https://ordinals.com".to_string(),
            resolution_spacing: Duration::from_millis(100),
            max_sat_pages: 10,
        }
    }
}

/// Duplicate pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding the registry partitions to validate and clean
    pub registry_dir: PathBuf,
    /// Glob selecting partition files inside `registry_dir`
    pub pattern: String,
    /// First block expected to be covered; defaults to 0
    pub expected_start: Option<u64>,
    /// Last block expected to be covered; defaults to the highest observed block
    pub expected_end: Option<u64>,
    pub report_dir: PathBuf,
    /// Report removals without rewriting any file
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn new(registry_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry_dir: registry_dir.into(),
            pattern: "*.json".to_string(),
            expected_start: None,
            expected_end: None,
            report_dir: PathBuf::from("reports"),
            dry_run: false,
        }
    }
}
