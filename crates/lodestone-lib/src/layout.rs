/// Deterministic mapping from logical entities to on-disk paths
use anyhow::Result;
use std::path::{Path, PathBuf};

/// The launcher data directory layout rooted at one directory.
///
/// All methods are pure path construction; nothing here touches the disk.
/// The layout is the on-disk contract: any tool writing the same paths is
/// interoperable with this launcher.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn natives_root(&self) -> PathBuf {
        self.root.join("natives")
    }

    pub fn version_dir(&self, version_id: &str) -> PathBuf {
        self.versions_dir().join(version_id)
    }

    /// `versions/<id>/<id>.json`
    pub fn descriptor_path(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.json", version_id))
    }

    /// `versions/<id>/<id>.jar`
    pub fn client_jar_path(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.jar", version_id))
    }

    /// Advisory launch lock: `versions/<id>/.lock`
    pub fn launch_lock_path(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id).join(".lock")
    }

    /// Resolve a descriptor-relative library path under `libraries/`.
    pub fn library_path(&self, relative: &str) -> PathBuf {
        self.libraries_dir().join(relative)
    }

    /// `assets/indexes/<id>.json`
    pub fn asset_index_path(&self, index_id: &str) -> PathBuf {
        self.assets_dir()
            .join("indexes")
            .join(format!("{}.json", index_id))
    }

    /// `assets/objects/<h[0..2]>/<h>`, content-addressed by SHA-1.
    pub fn asset_object_path(&self, hash: &str) -> PathBuf {
        self.assets_dir()
            .join("objects")
            .join(&hash[0..2])
            .join(hash)
    }

    /// Per-launch scratch directory: `natives/<id>-<nonce>/`.
    pub fn natives_dir(&self, version_id: &str, nonce: &str) -> PathBuf {
        self.natives_root()
            .join(format!("{}-{}", version_id, nonce))
    }
}

/// Map library coordinates (`group:artifact:version`, optional trailing
/// `:classifier`) onto their repository-relative jar path. The final
/// segment may carry an `@ext` suffix that overrides the `jar` extension.
pub fn maven_to_path(coords: &str) -> Result<String> {
    let mut segments = coords.split(':');
    let (Some(group), Some(artifact), Some(version)) =
        (segments.next(), segments.next(), segments.next())
    else {
        anyhow::bail!("malformed library coordinates {:?}", coords);
    };

    let (version, classifier, extension) = match segments.next() {
        Some(classifier) => match classifier.split_once('@') {
            Some((classifier, ext)) => (version, Some(classifier), ext),
            None => (version, Some(classifier), "jar"),
        },
        None => match version.split_once('@') {
            Some((version, ext)) => (version, None, ext),
            None => (version, None, "jar"),
        },
    };

    let mut file_name = format!("{}-{}", artifact, version);
    if let Some(classifier) = classifier {
        file_name.push('-');
        file_name.push_str(classifier);
    }
    file_name.push('.');
    file_name.push_str(extension);

    Ok(format!(
        "{}/{}/{}/{}",
        group.replace('.', "/"),
        artifact,
        version,
        file_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_and_jar_live_under_version_dir() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.descriptor_path("1.20.4"),
            Path::new("/data/versions/1.20.4/1.20.4.json")
        );
        assert_eq!(
            layout.client_jar_path("1.20.4"),
            Path::new("/data/versions/1.20.4/1.20.4.jar")
        );
    }

    #[test]
    fn asset_objects_are_sharded_by_hash_prefix() {
        let layout = DataLayout::new("/data");
        let hash = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        assert_eq!(
            layout.asset_object_path(hash),
            Path::new("/data/assets/objects/da").join(hash)
        );
    }

    #[test]
    fn natives_dir_is_scoped_by_nonce() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.natives_dir("1.20.4", "f00dcafe"),
            Path::new("/data/natives/1.20.4-f00dcafe")
        );
    }

    #[test]
    fn coordinates_map_to_repository_paths() {
        assert_eq!(
            maven_to_path("com.mojang:brigadier:1.1.8").unwrap(),
            "com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar"
        );
    }

    #[test]
    fn classifier_lands_in_the_file_name() {
        assert_eq!(
            maven_to_path("org.lwjgl:lwjgl:3.3.1:natives-linux").unwrap(),
            "org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1-natives-linux.jar"
        );
    }

    #[test]
    fn extension_override_works_with_and_without_classifier() {
        assert_eq!(
            maven_to_path("de.oceanlabs.mcp:mcp_config:1.20.1-20230612.114412@zip").unwrap(),
            "de/oceanlabs/mcp/mcp_config/1.20.1-20230612.114412/mcp_config-1.20.1-20230612.114412.zip"
        );
        assert_eq!(
            maven_to_path("com.example:lib:1.0:sources@zip").unwrap(),
            "com/example/lib/1.0/lib-1.0-sources.zip"
        );
    }

    #[test]
    fn coordinates_missing_a_version_are_rejected() {
        assert!(maven_to_path("org.lwjgl:lwjgl").is_err());
        assert!(maven_to_path("").is_err());
    }
}
