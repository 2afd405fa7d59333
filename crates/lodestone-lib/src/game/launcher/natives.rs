/// Native library extraction into a per-launch scratch directory
use crate::error::LaunchError;
use crate::game::descriptor::VersionDescriptor;
use crate::game::rules::{allows, PlatformContext};
use crate::layout::DataLayout;
use crate::utils::hash::sha1_hex;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One native jar to unpack plus its exclusion prefixes.
#[derive(Debug, Clone)]
pub struct NativeJar {
    pub path: PathBuf,
    pub exclude: Vec<String>,
}

/// A random per-launch token scoping the natives directory.
pub fn launch_nonce() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

/// Collect the on-disk native jars for this platform, rule-filtered, with
/// the same classifier resolution the planner uses for downloads.
pub fn native_jars(
    descriptor: &VersionDescriptor,
    layout: &DataLayout,
    ctx: &PlatformContext,
) -> Vec<NativeJar> {
    let mut jars = Vec::new();

    for library in &descriptor.libraries {
        if !allows(library.rules.as_ref(), ctx) {
            continue;
        }
        let Some(ref natives) = library.natives else {
            continue;
        };
        let Some(template) = natives.get(ctx.os_name.as_str()) else {
            continue;
        };
        let classifier = template.replace("${arch}", ctx.arch.bits());

        let artifact = library
            .downloads
            .as_ref()
            .and_then(|d| d.classifiers.as_ref())
            .and_then(|c| c.get(&classifier));

        match artifact {
            Some(artifact) => {
                let coords = format!("{}:{}", library.name, classifier);
                match artifact.path_or_derived(&coords) {
                    Ok(relative) => jars.push(NativeJar {
                        path: layout.library_path(&relative),
                        exclude: library
                            .extract
                            .as_ref()
                            .map(|e| e.exclude.clone())
                            .unwrap_or_default(),
                    }),
                    Err(e) => log::warn!(
                        "Cannot resolve native jar path for {}: {:#}",
                        library.name,
                        e
                    ),
                }
            }
            None => log::warn!(
                "Library {} has no {} classifier for natives",
                library.name,
                classifier
            ),
        }
    }

    jars
}

/// Unpack all native jars into `natives_dir`, skipping directory entries
/// and excluded prefixes. When two jars contribute the same path the bytes
/// must agree; differing content is a conflict, identical content keeps one.
pub async fn extract_natives(
    jars: Vec<NativeJar>,
    natives_dir: &Path,
) -> Result<(), LaunchError> {
    tokio::fs::create_dir_all(natives_dir).await?;

    let dest = natives_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_all_sync(&jars, &dest))
        .await
        .map_err(|e| LaunchError::Io(std::io::Error::other(e)))?
}

fn extract_all_sync(jars: &[NativeJar], dest: &Path) -> Result<(), LaunchError> {
    // entry path -> sha1 of the content already written
    let mut written: HashMap<PathBuf, String> = HashMap::new();

    for jar in jars {
        log::debug!("Extracting natives from {}", jar.path.display());

        let file = std::fs::File::open(&jar.path).map_err(|e| LaunchError::BadNativeArchive {
            path: jar.path.clone(),
            message: e.to_string(),
        })?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| LaunchError::BadNativeArchive {
                path: jar.path.clone(),
                message: e.to_string(),
            })?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| LaunchError::BadNativeArchive {
                path: jar.path.clone(),
                message: e.to_string(),
            })?;

            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            if should_exclude(&name, &jar.exclude) {
                continue;
            }

            // Entries that would escape the scratch dir are dropped outright.
            let Some(relative) = entry.enclosed_name() else {
                log::warn!(
                    "Skipping native entry with unsafe path {:?} in {}",
                    name,
                    jar.path.display()
                );
                continue;
            };
            let out_path = dest.join(relative);

            let mut content = Vec::with_capacity(entry.size() as usize);
            std::io::copy(&mut entry, &mut content)?;
            let digest = sha1_hex(&content);

            if let Some(previous) = written.get(&out_path) {
                if *previous != digest {
                    return Err(LaunchError::NativeConflict { entry: name });
                }
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out_path, &content)?;
            written.insert(out_path, digest);
        }
    }

    Ok(())
}

fn should_exclude(entry_path: &str, exclusions: &[String]) -> bool {
    exclusions.iter().any(|e| entry_path.starts_with(e.as_str()))
}

/// Remove leftover `natives/<id>-*` directories from earlier launches of
/// the same version. Best-effort: deletion failures are logged, not fatal.
pub async fn sweep_stale_natives(layout: &DataLayout, version_id: &str, current_nonce: &str) {
    let root = layout.natives_root();
    let keep = format!("{}-{}", version_id, current_nonce);
    let prefix = format!("{}-", version_id);

    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == keep || !name.starts_with(&prefix) {
            continue;
        }

        let path = entry.path();
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            log::warn!("Failed to remove stale natives dir {}: {}", path.display(), e);
        } else {
            log::debug!("Removed stale natives dir {}", path.display());
        }
    }
}
