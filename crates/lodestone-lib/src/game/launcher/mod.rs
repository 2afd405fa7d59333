/// Launch pipeline: lock, natives, plan, process
pub mod arguments;
pub mod classpath;
pub mod java;
pub mod lock;
pub mod natives;
pub mod plan;
pub mod process;

use crate::error::LaunchError;
use crate::game::descriptor::VersionDescriptor;
use crate::game::launcher::lock::LaunchLock;
use crate::game::launcher::natives::{
    extract_natives, launch_nonce, native_jars, sweep_stale_natives,
};
use crate::game::launcher::plan::{AccountCredential, LaunchPlan, LaunchPlanner, UserSettings};
use crate::game::rules::PlatformContext;
use crate::layout::DataLayout;
use std::path::{Path, PathBuf};

/// A launch that is ready to spawn: plan assembled, natives extracted,
/// per-version lock held. Dropping it releases the lock.
pub struct PreparedLaunch {
    pub plan: LaunchPlan,
    pub natives_dir: PathBuf,
    _lock: LaunchLock,
}

impl PreparedLaunch {
    /// Remove the per-launch natives scratch directory. Best-effort; a
    /// leftover directory gets swept on the next launch of this version.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.natives_dir).await {
            log::warn!(
                "Failed to remove natives dir {}: {}",
                self.natives_dir.display(),
                e
            );
        }
    }
}

/// Run the whole pre-spawn pipeline for one version: acquire the launch
/// lock, sweep stale scratch dirs, extract this launch's natives and build
/// the process plan.
pub async fn prepare_launch(
    layout: &DataLayout,
    ctx: &PlatformContext,
    descriptor: &VersionDescriptor,
    settings: &UserSettings,
    account: &AccountCredential,
    working_dir: &Path,
) -> Result<PreparedLaunch, LaunchError> {
    let lock = LaunchLock::acquire(layout, &descriptor.id)?;

    let nonce = launch_nonce();
    sweep_stale_natives(layout, &descriptor.id, &nonce).await;

    let natives_dir = layout.natives_dir(&descriptor.id, &nonce);
    let jars = native_jars(descriptor, layout, ctx);
    log::debug!(
        "Extracting {} native jars into {}",
        jars.len(),
        natives_dir.display()
    );
    extract_natives(jars, &natives_dir).await?;

    let plan = LaunchPlanner::new(layout, ctx).build(
        descriptor,
        settings,
        account,
        working_dir,
        &natives_dir,
    )?;

    Ok(PreparedLaunch {
        plan,
        natives_dir,
        _lock: lock,
    })
}
