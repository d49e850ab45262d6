//! Registry sources: a local directory of partitions or a remote listing

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::Glob;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::RegistryLocation;
use crate::provider::{ReqwestTransport, Transport};

/// A place partition files can be listed and read from.
#[async_trait]
pub trait RegistrySource: Send {
    /// Label used in logs and reports.
    fn id(&self) -> &str;

    /// All partition filenames, in no particular order.
    async fn list_files(&mut self) -> Result<Vec<String>>;

    /// Read one partition file as text.
    async fn read_file(&mut self, name: &str) -> Result<String>;
}

/// Keep the names matching `pattern`, sorted lexically.
pub fn filter_by_pattern(names: Vec<String>, pattern: &str) -> Result<Vec<String>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid filename pattern: {}", pattern))?
        .compile_matcher();
    let mut matched: Vec<String> = names.into_iter().filter(|n| matcher.is_match(n)).collect();
    matched.sort();
    matched.dedup();
    Ok(matched)
}

/// Open the source for a configured location.
pub fn open_source(
    location: &RegistryLocation,
    label: &str,
    timeout: Duration,
) -> Result<Box<dyn RegistrySource>> {
    match location {
        RegistryLocation::Local(path) => Ok(Box::new(LocalRegistry::open(label, path)?)),
        RegistryLocation::Remote(url) => Ok(Box::new(RemoteRegistry::new(label, url, timeout)?)),
    }
}

/// Directory of partition files.
pub struct LocalRegistry {
    label: String,
    root: PathBuf,
}

impl LocalRegistry {
    /// Open a registry directory. A missing directory is fatal.
    pub fn open(label: &str, root: &Path) -> Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("Registry directory not found: {}", root.display());
        }
        Ok(Self {
            label: label.to_string(),
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RegistrySource for LocalRegistry {
    fn id(&self) -> &str {
        &self.label
    }

    async fn list_files(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list registry: {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn read_file(&mut self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read partition: {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    #[serde(default)]
    download_url: Option<String>,
}

/// Remote registry exposed as a JSON listing of `{name, download_url}`.
///
/// The listing is fetched once and memoized; entries without a
/// `download_url` are fetched from `{listing_url}/{name}`.
pub struct RemoteRegistry<T: Transport = ReqwestTransport> {
    label: String,
    listing_url: String,
    transport: T,
    downloads: Option<BTreeMap<String, String>>,
}

impl RemoteRegistry<ReqwestTransport> {
    pub fn new(label: &str, listing_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self::with_transport(label, listing_url, ReqwestTransport::new(timeout)?))
    }
}

impl<T: Transport> RemoteRegistry<T> {
    pub fn with_transport(label: &str, listing_url: &str, transport: T) -> Self {
        Self {
            label: label.to_string(),
            listing_url: listing_url.to_string(),
            transport,
            downloads: None,
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let reply = self
            .transport
            .get(&self.label, url, None)
            .await
            .with_context(|| format!("Request failed: {}", url))?;
        if !reply.is_success() {
            anyhow::bail!("Request to {} failed with status: {}", url, reply.status);
        }
        Ok(reply.body)
    }

    async fn load_listing(&self) -> Result<BTreeMap<String, String>> {
        let body = self.fetch_text(&self.listing_url).await?;
        let entries: Vec<ListingEntry> = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse listing: {}", self.listing_url))?;
        let base = self.listing_url.trim_end_matches('/');
        let downloads: BTreeMap<String, String> = entries
            .into_iter()
            .map(|entry| {
                let url = entry
                    .download_url
                    .unwrap_or_else(|| format!("{}/{}", base, entry.name));
                (entry.name, url)
            })
            .collect();
        tracing::debug!(source = %self.label, files = downloads.len(), "remote listing loaded");
        Ok(downloads)
    }

    async fn downloads(&mut self) -> Result<&BTreeMap<String, String>> {
        let downloads = match self.downloads.take() {
            Some(downloads) => downloads,
            None => self.load_listing().await?,
        };
        Ok(&*self.downloads.insert(downloads))
    }
}

#[async_trait]
impl<T: Transport> RegistrySource for RemoteRegistry<T> {
    fn id(&self) -> &str {
        &self.label
    }

    async fn list_files(&mut self) -> Result<Vec<String>> {
        Ok(self.downloads().await?.keys().cloned().collect())
    }

    async fn read_file(&mut self, name: &str) -> Result<String> {
        let url = self.downloads().await?.get(name).cloned();
        let url = url.with_context(|| format!("{} is not listed by {}", name, self.listing_url))?;
        self.fetch_text(&url).await
    }
}
