/// Version descriptor model (the per-version JSON document)
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Everything needed to materialize and run one game version.
///
/// Unknown JSON keys are ignored so newer descriptor revisions keep parsing;
/// missing required keys are a parse error (fail closed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    /// Version ID (e.g., "1.20.4")
    pub id: String,

    /// Main class to execute
    pub main_class: String,

    /// Asset index reference
    pub asset_index: AssetIndexRef,

    /// Keyed downloads: "client" is required for launching; "server" and
    /// "client_mappings" also appear here and are passed through untouched.
    pub downloads: HashMap<String, DownloadEntry>,

    /// Libraries required for this version
    #[serde(default)]
    pub libraries: Vec<Library>,

    /// Modern argument lists (1.13+)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,

    /// Legacy game-argument string (pre-1.13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,

    /// Java version requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<JavaVersion>,

    /// Version type (release, snapshot, old_alpha, old_beta)
    #[serde(rename = "type")]
    pub version_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl VersionDescriptor {
    /// The client-jar download. Every launchable descriptor declares one.
    pub fn client_download(&self) -> Result<&DownloadEntry> {
        self.downloads
            .get("client")
            .context("descriptor has no client download")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    pub sha1: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub url: String,
    pub sha1: String,
    pub size: u64,
}

/// Game and JVM arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<Argument>,

    #[serde(default)]
    pub jvm: Vec<Argument>,
}

/// Argument that is either a literal string or a rule-guarded group.
/// The two wire shapes share nothing but the position they appear in,
/// hence the untagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Literal(String),
    Group {
        rules: Vec<Rule>,
        value: ArgumentValue,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Single(String),
    Multiple(Vec<String>),
}

impl ArgumentValue {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            ArgumentValue::Single(s) => vec![s.as_str()],
            ArgumentValue::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Conditional-inclusion rule for libraries and argument groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Regex over the host OS version string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// Library definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    /// Maven coordinates `group:artifact:version[:classifier]`
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,

    /// OS name -> native classifier (may contain a `${arch}` template)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,

    /// Extraction rules for native jars
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<LibraryArtifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<HashMap<String, LibraryArtifact>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryArtifact {
    /// Repository-relative path; derived from the coordinates when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub url: String,
    pub sha1: String,
    pub size: u64,
}

impl LibraryArtifact {
    /// The artifact path, either declared or derived from Maven coordinates.
    pub fn path_or_derived(&self, maven_name: &str) -> Result<String> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => crate::layout::maven_to_path(maven_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    pub component: String,
    pub major_version: u32,
}

/// The asset index file: logical asset name -> content-addressed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetIndexFile {
    pub objects: HashMap<String, AssetObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

/// Parse a descriptor from `versions/<id>/<id>.json`.
pub async fn load_descriptor(path: &Path) -> Result<VersionDescriptor> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read descriptor at {}", path.display()))?;

    let descriptor: VersionDescriptor = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse descriptor at {}", path.display()))?;

    Ok(descriptor)
}

/// Parse an asset index from `assets/indexes/<id>.json`.
pub async fn load_asset_index(path: &Path) -> Result<AssetIndexFile> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read asset index at {}", path.display()))?;

    let index: AssetIndexFile = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse asset index at {}", path.display()))?;

    Ok(index)
}
