/// Manifest and descriptor resolution against the upstream meta service
use crate::game::descriptor::{load_descriptor, VersionDescriptor};
use crate::game::metadata::types::{VersionManifest, DEFAULT_MANIFEST_URL};
use crate::layout::DataLayout;
use crate::utils::hash::{hashes_match, sha1_hex};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MANIFEST_RETRIES: u32 = 3;
const MANIFEST_BACKOFF_MS: u64 = 1000;

struct CachedManifest {
    fetched_at: Instant,
    manifest: Arc<VersionManifest>,
}

/// Resolves version manifests and per-version descriptors.
///
/// The manifest gets a short in-memory TTL cache; descriptors are cached on
/// disk at `versions/<id>/<id>.json` and refreshed only on request. Losing
/// the manifest service is fatal for installing new versions but never for
/// launching one that is already on disk.
pub struct ManifestResolver {
    client: reqwest::Client,
    manifest_url: String,
    layout: DataLayout,
    cache: Mutex<Option<CachedManifest>>,
    ttl: Duration,
}

impl ManifestResolver {
    pub fn new(layout: DataLayout) -> Result<Self> {
        Self::with_manifest_url(layout, DEFAULT_MANIFEST_URL.to_string())
    }

    pub fn with_manifest_url(layout: DataLayout, manifest_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            manifest_url,
            layout,
            cache: Mutex::new(None),
            ttl: Duration::from_secs(300),
        })
    }

    /// Fetch the version-list manifest, serving a cached copy while it is
    /// fresh. Retries transient failures a few times with linear-ish backoff.
    pub async fn fetch_manifest(&self) -> Result<Arc<VersionManifest>> {
        {
            let cache = self.cache.lock().await;
            if let Some(ref cached) = *cache {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.manifest.clone());
                }
            }
        }

        let manifest = Arc::new(self.fetch_manifest_uncached().await?);

        let mut cache = self.cache.lock().await;
        *cache = Some(CachedManifest {
            fetched_at: Instant::now(),
            manifest: manifest.clone(),
        });

        Ok(manifest)
    }

    async fn fetch_manifest_uncached(&self) -> Result<VersionManifest> {
        let mut last_error = None;

        for attempt in 0..MANIFEST_RETRIES {
            if attempt > 0 {
                let backoff = MANIFEST_BACKOFF_MS * 2u64.pow(attempt - 1);
                log::info!(
                    "Retrying manifest fetch (attempt {}/{}) after {}ms...",
                    attempt + 1,
                    MANIFEST_RETRIES,
                    backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.client.get(&self.manifest_url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        log::warn!("HTTP {} from manifest URL", status);
                        last_error = Some(anyhow::anyhow!("HTTP {} from manifest URL", status));
                        continue;
                    }

                    match response.json::<VersionManifest>().await {
                        Ok(manifest) => {
                            log::info!("Fetched manifest: {} versions", manifest.versions.len());
                            return Ok(manifest);
                        }
                        Err(e) => {
                            log::warn!("Failed to parse manifest JSON: {}", e);
                            last_error =
                                Some(anyhow::anyhow!("Failed to parse manifest JSON: {}", e));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Failed to GET manifest: {}", e);
                    last_error = Some(anyhow::anyhow!("Failed to GET manifest: {}", e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Failed to fetch manifest after {} retries", MANIFEST_RETRIES)
        }))
    }

    /// Resolve the descriptor for `version_id`. The on-disk copy wins unless
    /// `refresh` is set; otherwise the manifest is consulted and the
    /// document downloaded and cached.
    pub async fn fetch_descriptor(
        &self,
        version_id: &str,
        refresh: bool,
    ) -> Result<VersionDescriptor> {
        let path = self.layout.descriptor_path(version_id);

        if !refresh && path.exists() {
            match load_descriptor(&path).await {
                Ok(descriptor) => {
                    log::debug!("Using cached descriptor: {}", path.display());
                    return Ok(descriptor);
                }
                Err(e) => {
                    log::warn!(
                        "Cached descriptor unreadable ({:#}), refetching: {}",
                        e,
                        path.display()
                    );
                }
            }
        }

        let manifest = self.fetch_manifest().await?;
        let entry = manifest
            .find(version_id)
            .with_context(|| format!("Version {} not found in manifest", version_id))?;

        log::info!("Downloading descriptor {} -> {}", entry.url, path.display());

        let response = self
            .client
            .get(&entry.url)
            .send()
            .await
            .with_context(|| format!("Failed to GET descriptor for {}", version_id))?;

        anyhow::ensure!(
            response.status().is_success(),
            "HTTP {} fetching descriptor for {}",
            response.status(),
            version_id
        );

        let bytes = response.bytes().await?;

        if let Some(ref expected) = entry.sha1 {
            let computed = sha1_hex(&bytes);
            anyhow::ensure!(
                hashes_match(&computed, expected),
                "Descriptor sha1 mismatch for {}: expected {}, got {}",
                version_id,
                expected,
                computed
            );
        }

        // Parse before persisting so a bad document never poisons the cache.
        let descriptor: VersionDescriptor = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse descriptor for {}", version_id))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(descriptor)
    }
}
