/// Offline integrity audit of an installed version
use crate::game::descriptor::{load_asset_index, VersionDescriptor};
use crate::game::installer::planner::ArtifactPlanner;
use crate::game::installer::types::DownloadTask;
use crate::game::rules::PlatformContext;
use crate::layout::DataLayout;
use crate::utils::hash::{hashes_match, sha1_file};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    Missing,
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { expected: String, actual: String },
}

/// One file that disagrees with the descriptor. Mismatches are data, not
/// errors: the caller decides whether to repair, report or ignore.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub path: PathBuf,
    pub kind: MismatchKind,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MismatchKind::Missing => write!(f, "{}: missing", self.path.display()),
            MismatchKind::SizeMismatch { expected, actual } => write!(
                f,
                "{}: size {} (descriptor says {})",
                self.path.display(),
                actual,
                expected
            ),
            MismatchKind::HashMismatch { expected, actual } => write!(
                f,
                "{}: sha1 {} (descriptor says {})",
                self.path.display(),
                actual,
                expected
            ),
        }
    }
}

/// Recompute hashes of every on-disk artifact the descriptor declares and
/// report disagreements. Never touches the network, never repairs.
pub async fn verify_version(
    layout: &DataLayout,
    ctx: &PlatformContext,
    descriptor: &VersionDescriptor,
) -> Result<Vec<Mismatch>> {
    let planner = ArtifactPlanner::new(layout, ctx);
    let mut mismatches = Vec::new();

    let phase1 = planner.plan_version(descriptor)?;
    for task in &phase1 {
        audit(task, &mut mismatches).await?;
    }

    // Asset objects can only be audited against a healthy index.
    let index_path = layout.asset_index_path(&descriptor.asset_index.id);
    let index_is_healthy = !mismatches.iter().any(|m| m.path == index_path);

    if index_is_healthy {
        let index = load_asset_index(&index_path).await?;
        for task in planner.plan_assets(&index)? {
            audit(&task, &mut mismatches).await?;
        }
    } else {
        log::warn!(
            "Asset index {} is missing or corrupt; skipping object audit",
            index_path.display()
        );
    }

    Ok(mismatches)
}

async fn audit(task: &DownloadTask, mismatches: &mut Vec<Mismatch>) -> Result<()> {
    let path = &task.dest_path;

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(_) => {
            mismatches.push(Mismatch {
                path: path.clone(),
                kind: MismatchKind::Missing,
            });
            return Ok(());
        }
    };

    if let Some(expected) = task.expected_size {
        if meta.len() != expected {
            mismatches.push(Mismatch {
                path: path.clone(),
                kind: MismatchKind::SizeMismatch {
                    expected,
                    actual: meta.len(),
                },
            });
            return Ok(());
        }
    }

    if let Some(ref expected) = task.expected_sha1 {
        let computed = sha1_file(path).await?;
        if !hashes_match(&computed, expected) {
            mismatches.push(Mismatch {
                path: path.clone(),
                kind: MismatchKind::HashMismatch {
                    expected: expected.clone(),
                    actual: computed,
                },
            });
        }
    }

    Ok(())
}
