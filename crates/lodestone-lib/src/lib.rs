//! Launcher core: version resolution, content-addressed installation with
//! integrity guarantees, and process-launch planning for the game client.
//!
//! The crate is organized along the install/launch pipeline:
//! `metadata` resolves the upstream manifest and per-version descriptors,
//! `installer` expands a descriptor into download tasks and runs them with
//! bounded parallelism, `launcher` turns verified files into a spawned,
//! stream-captured child process. `layout` is the on-disk contract shared
//! by all of them.

pub mod error;
pub mod game;
pub mod layout;
pub mod utils;

pub use error::{FetchError, LaunchError, PlanError};
pub use game::descriptor::{self, VersionDescriptor};
pub use game::installer::fetch::{FetchConfig, HashedFetcher};
pub use game::installer::scheduler::{DownloadScheduler, DEFAULT_WORKERS};
pub use game::installer::types::{
    BatchReport, CancelSource, CancelToken, DownloadTask, ProgressSink, SilentProgressSink,
    TaskId, TaskKind,
};
pub use game::installer::verify::{verify_version, Mismatch, MismatchKind};
pub use game::installer::{InstallError, InstallOptions, Installer, InstallSummary};
pub use game::launcher::plan::{
    offline_uuid, AccountCredential, AccountMode, AccountProvider, LaunchPlan, LaunchPlanner,
    OfflineAccountProvider, ServerAddress, UserSettings,
};
pub use game::launcher::process::{LogSink, LogStream, ProcessHost, ProcessState};
pub use game::launcher::{prepare_launch, PreparedLaunch};
pub use game::metadata::{ManifestResolver, VersionManifest, VersionType};
pub use game::rules::{Arch, OsName, PlatformContext};
pub use layout::DataLayout;
