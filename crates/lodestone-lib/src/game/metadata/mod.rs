pub mod fetcher;
pub mod types;

pub use fetcher::ManifestResolver;
pub use types::{LatestVersions, ManifestVersion, VersionManifest, VersionType};
