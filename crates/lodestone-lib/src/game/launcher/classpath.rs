/// Classpath construction for the JVM invocation
use crate::error::LaunchError;
use crate::game::descriptor::VersionDescriptor;
use crate::game::rules::{allows, OsName, PlatformContext};
use crate::layout::DataLayout;
use std::path::PathBuf;

/// Ordered absolute classpath entries: every rule-included plain library
/// artifact in descriptor order, client jar always last. Native classifier
/// jars never appear on the classpath; they get extracted instead.
pub fn classpath_entries(
    descriptor: &VersionDescriptor,
    layout: &DataLayout,
    ctx: &PlatformContext,
) -> Result<Vec<PathBuf>, LaunchError> {
    let mut entries = Vec::new();

    for library in &descriptor.libraries {
        if !allows(library.rules.as_ref(), ctx) {
            continue;
        }

        let Some(artifact) = library.downloads.as_ref().and_then(|d| d.artifact.as_ref())
        else {
            continue;
        };

        let relative = artifact
            .path_or_derived(&library.name)
            .map_err(|e| crate::error::PlanError::BadDescriptor(e.to_string()))
            .map_err(LaunchError::Plan)?;
        let full_path = layout.library_path(&relative);
        if !full_path.exists() {
            return Err(LaunchError::MissingLibrary { path: full_path });
        }
        entries.push(full_path);
    }

    let client_jar = layout.client_jar_path(&descriptor.id);
    if !client_jar.exists() {
        return Err(LaunchError::MissingLibrary { path: client_jar });
    }
    entries.push(client_jar);

    Ok(entries)
}

/// Platform-joined classpath string (`;` on Windows, `:` elsewhere).
pub fn join_classpath(entries: &[PathBuf], os: OsName) -> String {
    entries
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(os.classpath_separator())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::descriptor::{
        AssetIndexRef, DownloadEntry, Library, LibraryArtifact, LibraryDownloads,
    };
    use crate::game::rules::Arch;
    use std::collections::HashMap;

    fn ctx() -> PlatformContext {
        PlatformContext {
            os_name: OsName::Linux,
            os_version: "test".into(),
            arch: Arch::X86_64,
            features: HashMap::new(),
        }
    }

    fn descriptor(libraries: Vec<Library>) -> VersionDescriptor {
        let mut downloads = HashMap::new();
        downloads.insert(
            "client".to_string(),
            DownloadEntry {
                url: "https://x/c.jar".into(),
                sha1: "bb".into(),
                size: 1,
            },
        );
        VersionDescriptor {
            id: "1.20.4".into(),
            main_class: "net.minecraft.client.main.Main".into(),
            asset_index: AssetIndexRef {
                id: "12".into(),
                sha1: "aa".into(),
                size: 1,
                total_size: 1,
                url: "https://x/12.json".into(),
            },
            downloads,
            libraries,
            arguments: None,
            minecraft_arguments: None,
            java_version: None,
            version_type: "release".into(),
            release_time: None,
            time: None,
        }
    }

    fn library(path: &str) -> Library {
        Library {
            name: "a:b:1".into(),
            downloads: Some(LibraryDownloads {
                artifact: Some(LibraryArtifact {
                    path: Some(path.to_string()),
                    url: "https://x/lib.jar".into(),
                    sha1: "cc".into(),
                    size: 1,
                }),
                classifiers: None,
            }),
            rules: None,
            natives: None,
            extract: None,
        }
    }

    #[tokio::test]
    async fn client_jar_is_always_last() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());

        let lib_rel = "a/b/1/b-1.jar";
        let lib_abs = layout.library_path(lib_rel);
        tokio::fs::create_dir_all(lib_abs.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&lib_abs, b"lib").await.unwrap();

        let jar = layout.client_jar_path("1.20.4");
        tokio::fs::create_dir_all(jar.parent().unwrap()).await.unwrap();
        tokio::fs::write(&jar, b"client").await.unwrap();

        let entries =
            classpath_entries(&descriptor(vec![library(lib_rel)]), &layout, &ctx()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], lib_abs);
        assert_eq!(*entries.last().unwrap(), jar);
    }

    #[tokio::test]
    async fn missing_library_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());

        let jar = layout.client_jar_path("1.20.4");
        tokio::fs::create_dir_all(jar.parent().unwrap()).await.unwrap();
        tokio::fs::write(&jar, b"client").await.unwrap();

        let err = classpath_entries(
            &descriptor(vec![library("a/b/1/missing.jar")]),
            &layout,
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, LaunchError::MissingLibrary { .. }));
    }

    #[test]
    fn separator_follows_platform() {
        let entries = vec![PathBuf::from("/a.jar"), PathBuf::from("/b.jar")];
        assert_eq!(join_classpath(&entries, OsName::Linux), "/a.jar:/b.jar");
        assert_eq!(join_classpath(&entries, OsName::Windows), "/a.jar;/b.jar");
    }
}
