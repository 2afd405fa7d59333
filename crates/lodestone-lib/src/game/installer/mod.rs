/// Version installation: two-phase planning and batched downloads
pub mod fetch;
pub mod planner;
pub mod scheduler;
pub mod types;
pub mod verify;

#[cfg(test)]
mod tests;

use crate::error::{FetchError, PlanError};
use crate::game::descriptor::load_asset_index;
use crate::game::installer::fetch::HashedFetcher;
use crate::game::installer::planner::ArtifactPlanner;
use crate::game::installer::scheduler::DownloadScheduler;
use crate::game::installer::types::{BatchReport, CancelToken, ProgressSink};
use crate::game::metadata::fetcher::ManifestResolver;
use crate::game::rules::PlatformContext;
use crate::layout::DataLayout;
use std::sync::Arc;
use thiserror::Error;

/// Why an install failed, split by operator-visible cause.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("could not resolve version metadata: {0:#}")]
    Manifest(anyhow::Error),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("{failed} of {total} download tasks failed; first failure: {first}")]
    Tasks {
        total: usize,
        failed: usize,
        first: FetchError,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct InstallSummary {
    pub tasks_completed: usize,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub workers: usize,
    /// Refetch the descriptor even when a cached copy exists.
    pub refresh_descriptor: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            workers: scheduler::DEFAULT_WORKERS,
            refresh_descriptor: false,
        }
    }
}

/// Materializes complete versions on disk. Install is idempotent: re-running
/// after success verifies files by hash and transfers nothing.
pub struct Installer {
    layout: DataLayout,
    resolver: Arc<ManifestResolver>,
    fetcher: Arc<HashedFetcher>,
    ctx: PlatformContext,
    asset_base_url: String,
}

impl Installer {
    pub fn new(
        layout: DataLayout,
        resolver: Arc<ManifestResolver>,
        fetcher: Arc<HashedFetcher>,
        ctx: PlatformContext,
    ) -> Self {
        Self {
            layout,
            resolver,
            fetcher,
            ctx,
            asset_base_url: planner::ASSET_RESOURCES_URL.to_string(),
        }
    }

    /// Point asset-object URLs at a different store (mirrors, tests).
    pub fn with_asset_base_url(mut self, base: impl Into<String>) -> Self {
        self.asset_base_url = base.into();
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Install `version_id`: resolve the descriptor, run the phase-1 batch
    /// (client jar, libraries, natives, asset index), then expand and run
    /// the phase-2 asset-object batch.
    pub async fn install(
        &self,
        version_id: &str,
        options: &InstallOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancelToken,
    ) -> Result<InstallSummary, InstallError> {
        log::info!("Installing version {}", version_id);

        for dir in [
            self.layout.versions_dir(),
            self.layout.libraries_dir(),
            self.layout.assets_dir(),
            self.layout.natives_root(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let descriptor = self
            .resolver
            .fetch_descriptor(version_id, options.refresh_descriptor)
            .await
            .map_err(InstallError::Manifest)?;

        let scheduler = DownloadScheduler::new(self.fetcher.clone(), options.workers);
        let planner = ArtifactPlanner::new(&self.layout, &self.ctx)
            .with_asset_base_url(&self.asset_base_url);
        let mut summary = InstallSummary::default();

        let phase1 = planner.plan_version(&descriptor)?;
        log::info!("Phase 1: {} tasks", phase1.len());
        let report = scheduler.run(phase1, sink.clone(), cancel).await;
        absorb(report, cancel, &mut summary)?;

        // Phase 2 can only be planned now: the object set lives inside the
        // asset index that phase 1 just put on disk.
        let index_path = self.layout.asset_index_path(&descriptor.asset_index.id);
        let index = load_asset_index(&index_path)
            .await
            .map_err(InstallError::Manifest)?;

        let phase2 = planner.plan_assets(&index)?;
        log::info!("Phase 2: {} unique asset objects", phase2.len());
        let report = scheduler.run(phase2, sink, cancel).await;
        absorb(report, cancel, &mut summary)?;

        log::info!(
            "Install of {} complete: {} tasks, {} bytes transferred",
            version_id,
            summary.tasks_completed,
            summary.bytes_transferred
        );

        Ok(summary)
    }
}

/// Fold one batch outcome into the running summary, converting any failure
/// into the operation-level error policy: install treats a single failed
/// task as failure of the whole operation.
fn absorb(
    report: BatchReport,
    cancel: &CancelToken,
    summary: &mut InstallSummary,
) -> Result<(), InstallError> {
    summary.tasks_completed += report.completed.len();
    summary.bytes_transferred += report.bytes_transferred;

    if report.is_success() {
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let total = report.completed.len() + report.failed.len();
    let failed = report.failed.len();
    let first = report
        .failed
        .into_iter()
        .map(|(_, e)| e)
        .find(|e| !matches!(e, FetchError::Cancelled))
        .unwrap_or(FetchError::Cancelled);

    Err(InstallError::Tasks {
        total,
        failed,
        first,
    })
}
