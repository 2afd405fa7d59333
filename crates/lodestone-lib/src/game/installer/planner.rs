/// Expansion of a version descriptor into concrete download tasks
use crate::error::PlanError;
use crate::game::descriptor::{AssetIndexFile, Library, VersionDescriptor};
use crate::game::installer::types::{DownloadTask, TaskKind};
use crate::game::rules::{allows, PlatformContext};
use crate::layout::DataLayout;
use std::collections::HashMap;
use std::path::{Component, Path};

/// Content-addressed asset object store.
pub const ASSET_RESOURCES_URL: &str = "https://resources.download.minecraft.net";

/// Expands a descriptor into download tasks for one platform.
///
/// Planning happens in two phases because the set of asset-object tasks is
/// unknown until the asset index itself is on disk: `plan_version` emits
/// the client jar, libraries, natives and the asset index; `plan_assets`
/// emits the objects once the index has been fetched and parsed.
pub struct ArtifactPlanner<'a> {
    layout: &'a DataLayout,
    ctx: &'a PlatformContext,
    asset_base_url: &'a str,
}

impl<'a> ArtifactPlanner<'a> {
    pub fn new(layout: &'a DataLayout, ctx: &'a PlatformContext) -> Self {
        Self {
            layout,
            ctx,
            asset_base_url: ASSET_RESOURCES_URL,
        }
    }

    /// Point asset-object URLs at a different store (mirrors, tests).
    pub fn with_asset_base_url(mut self, base: &'a str) -> Self {
        self.asset_base_url = base;
        self
    }

    /// Phase 1: client jar, rule-included libraries (plus their platform
    /// native jars) and the asset index document.
    pub fn plan_version(
        &self,
        descriptor: &VersionDescriptor,
    ) -> Result<Vec<DownloadTask>, PlanError> {
        let mut tasks = Vec::new();

        let client = descriptor
            .client_download()
            .map_err(|e| PlanError::BadDescriptor(e.to_string()))?;

        tasks.push(DownloadTask {
            source_url: client.url.clone(),
            dest_path: self.layout.client_jar_path(&descriptor.id),
            expected_sha1: Some(client.sha1.clone()),
            expected_size: Some(client.size),
            kind: TaskKind::Client,
        });

        for library in &descriptor.libraries {
            if !allows(library.rules.as_ref(), self.ctx) {
                log::debug!("Skipping library due to rules: {}", library.name);
                continue;
            }
            self.plan_library(library, &mut tasks)?;
        }

        let index = &descriptor.asset_index;
        tasks.push(DownloadTask {
            source_url: index.url.clone(),
            dest_path: self.layout.asset_index_path(&index.id),
            expected_sha1: Some(index.sha1.clone()),
            expected_size: Some(index.size),
            kind: TaskKind::AssetIndex,
        });

        dedupe(tasks)
    }

    /// Phase 2: one task per unique asset object. Many logical names may
    /// share one hash; the object store is keyed by content.
    pub fn plan_assets(&self, index: &AssetIndexFile) -> Result<Vec<DownloadTask>, PlanError> {
        let mut by_hash: HashMap<&str, DownloadTask> = HashMap::new();

        for (name, object) in &index.objects {
            if object.hash.len() < 2 {
                return Err(PlanError::BadDescriptor(format!(
                    "asset {} has malformed hash {:?}",
                    name, object.hash
                )));
            }

            by_hash.entry(object.hash.as_str()).or_insert_with(|| {
                let prefix = &object.hash[0..2];
                DownloadTask {
                    source_url: format!("{}/{}/{}", self.asset_base_url, prefix, object.hash),
                    dest_path: self.layout.asset_object_path(&object.hash),
                    expected_sha1: Some(object.hash.clone()),
                    expected_size: Some(object.size),
                    kind: TaskKind::AssetObject,
                }
            });
        }

        // Deterministic order for stable batches.
        let mut tasks: Vec<DownloadTask> = by_hash.into_values().collect();
        tasks.sort_by(|a, b| a.dest_path.cmp(&b.dest_path));

        dedupe(tasks)
    }

    fn plan_library(
        &self,
        library: &Library,
        tasks: &mut Vec<DownloadTask>,
    ) -> Result<(), PlanError> {
        let Some(ref downloads) = library.downloads else {
            return Ok(());
        };

        if let Some(ref artifact) = downloads.artifact {
            let relative = artifact
                .path_or_derived(&library.name)
                .map_err(|e| PlanError::BadDescriptor(e.to_string()))?;
            checked_relative_path(&library.name, &relative)?;
            tasks.push(DownloadTask {
                source_url: artifact.url.clone(),
                dest_path: self.layout.library_path(&relative),
                expected_sha1: Some(artifact.sha1.clone()),
                expected_size: Some(artifact.size),
                kind: TaskKind::Library,
            });
        }

        if let Some(ref natives) = library.natives {
            let Some(template) = natives.get(self.ctx.os_name.as_str()) else {
                return Ok(());
            };
            // Old descriptors template the word size into the classifier.
            let classifier = template.replace("${arch}", self.ctx.arch.bits());

            match downloads
                .classifiers
                .as_ref()
                .and_then(|c| c.get(&classifier))
            {
                Some(native) => {
                    let coords = format!("{}:{}", library.name, classifier);
                    let relative = native
                        .path_or_derived(&coords)
                        .map_err(|e| PlanError::BadDescriptor(e.to_string()))?;
                    checked_relative_path(&library.name, &relative)?;
                    tasks.push(DownloadTask {
                        source_url: native.url.clone(),
                        dest_path: self.layout.library_path(&relative),
                        expected_sha1: Some(native.sha1.clone()),
                        expected_size: Some(native.size),
                        kind: TaskKind::Native,
                    });
                }
                None => {
                    log::warn!(
                        "Library {} declares natives for {} but has no {} classifier",
                        library.name,
                        self.ctx.os_name.as_str(),
                        classifier
                    );
                }
            }
        }

        Ok(())
    }
}

/// Reject descriptor-supplied paths that would escape the libraries root.
fn checked_relative_path(library: &str, path: &str) -> Result<(), PlanError> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        });

    if escapes {
        return Err(PlanError::BadDescriptor(format!(
            "library {} declares an unsafe artifact path {:?}",
            library, path
        )));
    }
    Ok(())
}

/// Deduplicate by destination path, keeping first occurrence. Two tasks for
/// the same path with disagreeing hashes indicate a malformed descriptor.
fn dedupe(tasks: Vec<DownloadTask>) -> Result<Vec<DownloadTask>, PlanError> {
    let mut seen: HashMap<std::path::PathBuf, usize> = HashMap::new();
    let mut out: Vec<DownloadTask> = Vec::with_capacity(tasks.len());

    for task in tasks {
        match seen.get(&task.dest_path) {
            None => {
                seen.insert(task.dest_path.clone(), out.len());
                out.push(task);
            }
            Some(&existing) => {
                let kept = &out[existing];
                if let (Some(a), Some(b)) = (&kept.expected_sha1, &task.expected_sha1) {
                    if !a.eq_ignore_ascii_case(b) {
                        return Err(PlanError::Conflict {
                            path: task.dest_path.clone(),
                            first: a.clone(),
                            second: b.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(out)
}
