//! End-to-end install flows against a mock upstream: a manifest, one
//! descriptor, a client jar, a plain library, a native jar and a small
//! content-addressed asset store.

use crate::game::installer::fetch::{FetchConfig, HashedFetcher};
use crate::game::installer::types::{CancelSource, CancelToken, SilentProgressSink};
use crate::game::installer::verify::verify_version;
use crate::game::installer::{InstallError, InstallOptions, Installer};
use crate::game::metadata::fetcher::ManifestResolver;
use crate::game::rules::{Arch, OsName, PlatformContext};
use crate::layout::DataLayout;
use crate::utils::hash::sha1_hex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Upstream {
    server: MockServer,
    client_jar: Vec<u8>,
    library: Vec<u8>,
    native: Vec<u8>,
    asset_a: Vec<u8>,
    asset_b: Vec<u8>,
    index_len: u64,
}

const LIB_PATH: &str = "com/example/demo/1.0/demo-1.0.jar";
const NATIVE_PATH: &str = "org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1-natives-linux.jar";

impl Upstream {
    async fn start() -> Self {
        let server = MockServer::start().await;

        let client_jar = b"client jar bytes".to_vec();
        let library = b"demo library bytes".to_vec();
        let native = b"native jar bytes".to_vec();
        let asset_a = b"cave ambience".to_vec();
        let asset_b = b"language file".to_vec();

        let hash_a = sha1_hex(&asset_a);
        let hash_b = sha1_hex(&asset_b);

        // Two logical names share hash_a: the store must hold two objects,
        // not three.
        let index_body = format!(
            r#"{{"objects": {{
                "minecraft/sounds/cave1.ogg": {{"hash": "{a}", "size": {a_len}}},
                "minecraft/sounds/cave1_alias.ogg": {{"hash": "{a}", "size": {a_len}}},
                "minecraft/lang/en_us.json": {{"hash": "{b}", "size": {b_len}}}
            }}}}"#,
            a = hash_a,
            a_len = asset_a.len(),
            b = hash_b,
            b_len = asset_b.len(),
        );

        let descriptor_body = format!(
            r#"{{
                "id": "1.20.4",
                "mainClass": "net.minecraft.client.main.Main",
                "assetIndex": {{
                    "id": "12",
                    "sha1": "{index_sha}",
                    "size": {index_len},
                    "totalSize": 1000,
                    "url": "{uri}/indexes/12.json"
                }},
                "downloads": {{
                    "client": {{"url": "{uri}/files/client.jar", "sha1": "{client_sha}", "size": {client_len}}}
                }},
                "libraries": [
                    {{
                        "name": "com.example:demo:1.0",
                        "downloads": {{
                            "artifact": {{
                                "path": "{lib_path}",
                                "url": "{uri}/files/demo-1.0.jar",
                                "sha1": "{lib_sha}",
                                "size": {lib_len}
                            }}
                        }}
                    }},
                    {{
                        "name": "org.lwjgl:lwjgl:3.3.1",
                        "natives": {{"linux": "natives-linux"}},
                        "extract": {{"exclude": ["META-INF/"]}},
                        "downloads": {{
                            "classifiers": {{
                                "natives-linux": {{
                                    "path": "{native_path}",
                                    "url": "{uri}/files/natives.jar",
                                    "sha1": "{native_sha}",
                                    "size": {native_len}
                                }}
                            }}
                        }}
                    }}
                ],
                "type": "release"
            }}"#,
            uri = server.uri(),
            index_sha = sha1_hex(index_body.as_bytes()),
            index_len = index_body.len(),
            client_sha = sha1_hex(&client_jar),
            client_len = client_jar.len(),
            lib_path = LIB_PATH,
            lib_sha = sha1_hex(&library),
            lib_len = library.len(),
            native_path = NATIVE_PATH,
            native_sha = sha1_hex(&native),
            native_len = native.len(),
        );

        let manifest_body = format!(
            r#"{{
                "latest": {{"release": "1.20.4", "snapshot": "1.20.4"}},
                "versions": [{{
                    "id": "1.20.4",
                    "type": "release",
                    "url": "{uri}/v1/1.20.4.json",
                    "time": "2023-12-07T12:56:20+00:00",
                    "releaseTime": "2023-12-07T12:56:20+00:00",
                    "sha1": "{sha}"
                }}]
            }}"#,
            uri = server.uri(),
            sha = sha1_hex(descriptor_body.as_bytes()),
        );

        let index_len = index_body.len() as u64;
        let mounts: Vec<(String, Vec<u8>)> = vec![
            ("/manifest.json".into(), manifest_body.into_bytes()),
            ("/v1/1.20.4.json".into(), descriptor_body.into_bytes()),
            ("/indexes/12.json".into(), index_body.into_bytes()),
            ("/files/client.jar".into(), client_jar.clone()),
            ("/files/demo-1.0.jar".into(), library.clone()),
            ("/files/natives.jar".into(), native.clone()),
            (format!("/objects/{}/{}", &hash_a[0..2], hash_a), asset_a.clone()),
            (format!("/objects/{}/{}", &hash_b[0..2], hash_b), asset_b.clone()),
        ];
        for (route, body) in mounts {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&server)
                .await;
        }

        Self {
            server,
            client_jar,
            library,
            native,
            asset_a,
            asset_b,
            index_len,
        }
    }

    fn total_payload_bytes(&self) -> u64 {
        // Everything a fresh install transfers besides the descriptor:
        // client + library + native + asset index + two unique objects.
        (self.client_jar.len()
            + self.library.len()
            + self.native.len()
            + self.asset_a.len()
            + self.asset_b.len()) as u64
            + self.index_len
    }
}

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

fn linux_ctx() -> PlatformContext {
    PlatformContext {
        os_name: OsName::Linux,
        os_version: "Linux 6.1.0".to_string(),
        arch: Arch::X86_64,
        features: HashMap::new(),
    }
}

fn make_installer(root: &Path, upstream: &Upstream) -> Installer {
    let layout = DataLayout::new(root);
    let resolver = ManifestResolver::with_manifest_url(
        layout.clone(),
        format!("{}/manifest.json", upstream.server.uri()),
    )
    .unwrap();
    let fetcher = HashedFetcher::with_client(
        reqwest::Client::new(),
        FetchConfig {
            max_retries: 1,
            backoff_base: Duration::from_millis(5),
            ..FetchConfig::default()
        },
    );

    Installer::new(layout, Arc::new(resolver), Arc::new(fetcher), linux_ctx())
        .with_asset_base_url(format!("{}/objects", upstream.server.uri()))
}

async fn run_install(installer: &Installer) -> Result<u64, InstallError> {
    installer
        .install(
            "1.20.4",
            &InstallOptions::default(),
            Arc::new(SilentProgressSink),
            &CancelToken::never(),
        )
        .await
        .map(|s| s.bytes_transferred)
}

#[tokio::test]
async fn fresh_install_materializes_everything_and_verifies_clean() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    let bytes = run_install(&installer).await.unwrap();
    assert_eq!(bytes, upstream.total_payload_bytes());

    let layout = installer.layout();
    assert_eq!(
        tokio::fs::read(layout.client_jar_path("1.20.4")).await.unwrap(),
        upstream.client_jar
    );
    assert_eq!(
        tokio::fs::read(layout.library_path(LIB_PATH)).await.unwrap(),
        upstream.library
    );
    assert_eq!(
        tokio::fs::read(layout.library_path(NATIVE_PATH)).await.unwrap(),
        upstream.native
    );
    assert!(layout.asset_index_path("12").exists());
    assert!(layout
        .asset_object_path(&sha1_hex(&upstream.asset_a))
        .exists());
    assert!(layout
        .asset_object_path(&sha1_hex(&upstream.asset_b))
        .exists());

    let descriptor =
        crate::game::descriptor::load_descriptor(&layout.descriptor_path("1.20.4"))
            .await
            .unwrap();
    let ctx = linux_ctx();
    let mismatches = verify_version(layout, &ctx, &descriptor).await.unwrap();
    assert!(mismatches.is_empty(), "unexpected mismatches: {:?}", mismatches);
}

#[tokio::test]
async fn reinstall_after_success_transfers_zero_bytes() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    run_install(&installer).await.unwrap();
    let second = run_install(&installer).await.unwrap();
    assert_eq!(second, 0);
}

#[tokio::test]
async fn deleted_library_is_the_only_refetch() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    run_install(&installer).await.unwrap();

    let lib_path = installer.layout().library_path(LIB_PATH);
    tokio::fs::remove_file(&lib_path).await.unwrap();

    let bytes = run_install(&installer).await.unwrap();
    assert_eq!(bytes, upstream.library.len() as u64);
    assert_eq!(tokio::fs::read(&lib_path).await.unwrap(), upstream.library);

    let descriptor = crate::game::descriptor::load_descriptor(
        &installer.layout().descriptor_path("1.20.4"),
    )
    .await
    .unwrap();
    let ctx = linux_ctx();
    let mismatches = verify_version(installer.layout(), &ctx, &descriptor)
        .await
        .unwrap();
    assert!(mismatches.is_empty());
}

#[tokio::test]
async fn corrupted_library_is_replaced_on_reinstall() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    run_install(&installer).await.unwrap();

    // Flip content while keeping the length; only the hash can tell.
    let lib_path = installer.layout().library_path(LIB_PATH);
    let corrupted = vec![0x00u8; upstream.library.len()];
    tokio::fs::write(&lib_path, &corrupted).await.unwrap();

    let bytes = run_install(&installer).await.unwrap();
    assert_eq!(bytes, upstream.library.len() as u64);
    assert_eq!(tokio::fs::read(&lib_path).await.unwrap(), upstream.library);
}

#[tokio::test]
async fn verify_flags_corruption_without_repairing() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    run_install(&installer).await.unwrap();

    let lib_path = installer.layout().library_path(LIB_PATH);
    let corrupted = vec![0xffu8; upstream.library.len()];
    tokio::fs::write(&lib_path, &corrupted).await.unwrap();

    let descriptor = crate::game::descriptor::load_descriptor(
        &installer.layout().descriptor_path("1.20.4"),
    )
    .await
    .unwrap();
    let ctx = linux_ctx();
    let mismatches = verify_version(installer.layout(), &ctx, &descriptor)
        .await
        .unwrap();

    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].path, lib_path);
    // Still corrupt afterwards: verify never repairs.
    assert_eq!(tokio::fs::read(&lib_path).await.unwrap(), corrupted);
}

#[tokio::test]
async fn cancelled_install_surfaces_cancellation() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let installer = make_installer(dir.path(), &upstream);

    let (source, token) = CancelSource::new();
    source.cancel();

    let err = installer
        .install(
            "1.20.4",
            &InstallOptions::default(),
            Arc::new(SilentProgressSink),
            &token,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::Cancelled));
}

#[tokio::test]
async fn unknown_version_is_a_metadata_error() {
    init_logging();
    let upstream = Upstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    let resolver = ManifestResolver::with_manifest_url(
        layout.clone(),
        format!("{}/manifest.json", upstream.server.uri()),
    )
    .unwrap();
    let fetcher =
        HashedFetcher::with_client(reqwest::Client::new(), FetchConfig::default());
    let installer =
        Installer::new(layout, Arc::new(resolver), Arc::new(fetcher), linux_ctx());

    let err = installer
        .install(
            "9.99.9",
            &InstallOptions::default(),
            Arc::new(SilentProgressSink),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::Manifest(_)));
}
