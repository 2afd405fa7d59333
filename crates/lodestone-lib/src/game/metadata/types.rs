use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default upstream manifest service.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// The version-list manifest. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionManifest {
    pub latest: LatestVersions,
    pub versions: Vec<ManifestVersion>,
}

impl VersionManifest {
    pub fn find(&self, version_id: &str) -> Option<&ManifestVersion> {
        self.versions.iter().find(|v| v.id == version_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

/// One row of the manifest: where to find the authoritative descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestVersion {
    pub id: String,

    #[serde(rename = "type")]
    pub version_type: VersionType,

    /// Descriptor document URL
    pub url: String,

    pub time: DateTime<Utc>,
    pub release_time: DateTime<Utc>,

    /// SHA-1 of the descriptor document (v2 manifests only)
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Release,
    Snapshot,
    OldAlpha,
    OldBeta,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Release => "release",
            VersionType::Snapshot => "snapshot",
            VersionType::OldAlpha => "old_alpha",
            VersionType::OldBeta => "old_beta",
        }
    }
}

impl std::str::FromStr for VersionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "release" => Ok(VersionType::Release),
            "snapshot" => Ok(VersionType::Snapshot),
            "old_alpha" => Ok(VersionType::OldAlpha),
            "old_beta" => Ok(VersionType::OldBeta),
            _ => Err(anyhow::anyhow!("Unknown version type: {}", s)),
        }
    }
}
