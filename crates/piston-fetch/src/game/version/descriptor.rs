//! version.json model.
//!
//! Argument data comes in three shapes depending on era and loader; they are
//! lifted into [`LaunchArguments`] at parse time so the rest of the engine
//! never inspects nullable fields to guess which one it has.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mojang's version_manifest_v2.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub latest: Option<LatestVersions>,
    pub versions: Vec<VersionManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifestEntry {
    pub id: String,
    #[serde(rename = "type", default)]
    pub version_type: Option<String>,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub release_time: Option<String>,
}

impl VersionManifest {
    pub fn find(&self, id: &str) -> Option<&VersionManifestEntry> {
        self.versions.iter().find(|v| v.id == id)
    }
}

/// A resolved or raw version descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawVersionDescriptor", into = "RawVersionDescriptor")]
pub struct VersionDescriptor {
    pub id: String,
    pub version_type: Option<String>,
    pub main_class: Option<String>,
    pub inherits_from: Option<String>,
    pub asset_index: Option<AssetIndexRef>,
    pub assets: Option<String>,
    pub java_version: Option<JavaVersion>,
    pub downloads: Option<VersionDownloads>,
    pub libraries: Vec<Library>,
    pub arguments: LaunchArguments,
    pub release_time: Option<String>,
    pub time: Option<String>,
}

impl VersionDescriptor {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// True once every `inheritsFrom` link has been merged away.
    pub fn is_complete(&self) -> bool {
        self.inherits_from.is_none()
    }

    /// Asset index id, falling back to the legacy `assets` field.
    pub fn assets_id(&self) -> Option<&str> {
        self.asset_index
            .as_ref()
            .map(|a| a.id.as_str())
            .or(self.assets.as_deref())
    }

    pub fn client_download(&self) -> Option<&DownloadInfo> {
        self.downloads.as_ref().and_then(|d| d.client.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub major_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<DownloadInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<DownloadInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,
    /// Maven repository base (Fabric/Quilt style entries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Library {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            downloads: None,
            url: None,
            natives: None,
            rules: None,
            extract: None,
            sha1: None,
            size: None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.downloads.as_ref().and_then(|d| d.artifact.as_ref())
    }

    pub fn classifier(&self, key: &str) -> Option<&Artifact> {
        self.downloads
            .as_ref()
            .and_then(|d| d.classifiers.as_ref())
            .and_then(|c| c.get(key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<HashMap<String, Artifact>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Rule for conditional arguments/libraries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// Argument that can be simple or conditional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Simple(String),
    Conditional { rules: Vec<Rule>, value: ArgumentValue },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Single(String),
    Multiple(Vec<String>),
}

/// The argument template shapes found in the wild.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LaunchArguments {
    #[default]
    None,
    /// Pre-1.13 vanilla `minecraftArguments`.
    Vanilla(String),
    /// Legacy Forge/LiteLoader `minecraftArguments`; a full replacement of
    /// the parent's string, recognised by its `--tweakClass`.
    ForgeLegacy(String),
    /// 1.13+ structured `arguments`.
    Modern {
        game: Vec<Argument>,
        jvm: Vec<Argument>,
    },
}

impl LaunchArguments {
    fn from_raw(arguments: Option<RawArguments>, legacy: Option<String>) -> Self {
        match (arguments, legacy) {
            (Some(args), _) => LaunchArguments::Modern {
                game: args.game,
                jvm: args.jvm,
            },
            (None, Some(s)) if s.contains("--tweakClass") => LaunchArguments::ForgeLegacy(s),
            (None, Some(s)) => LaunchArguments::Vanilla(s),
            (None, None) => LaunchArguments::None,
        }
    }

    fn into_raw(self) -> (Option<RawArguments>, Option<String>) {
        match self {
            LaunchArguments::None => (None, None),
            LaunchArguments::Vanilla(s) | LaunchArguments::ForgeLegacy(s) => (None, Some(s)),
            LaunchArguments::Modern { game, jvm } => (Some(RawArguments { game, jvm }), None),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LaunchArguments::None => true,
            LaunchArguments::Vanilla(s) | LaunchArguments::ForgeLegacy(s) => s.trim().is_empty(),
            LaunchArguments::Modern { game, jvm } => game.is_empty() && jvm.is_empty(),
        }
    }

    /// Tokens of a legacy argument string, honouring quotes.
    pub fn legacy_tokens(&self) -> Option<Vec<String>> {
        match self {
            LaunchArguments::Vanilla(s) | LaunchArguments::ForgeLegacy(s) => {
                shlex::split(s).or_else(|| Some(s.split_whitespace().map(String::from).collect()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawArguments {
    #[serde(default)]
    game: Vec<Argument>,
    #[serde(default)]
    jvm: Vec<Argument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersionDescriptor {
    id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    version_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    main_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inherits_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asset_index: Option<AssetIndexRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assets: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    java_version: Option<JavaVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    downloads: Option<VersionDownloads>,
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<RawArguments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minecraft_arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    release_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
}

impl From<RawVersionDescriptor> for VersionDescriptor {
    fn from(raw: RawVersionDescriptor) -> Self {
        Self {
            arguments: LaunchArguments::from_raw(raw.arguments, raw.minecraft_arguments),
            id: raw.id,
            version_type: raw.version_type,
            main_class: raw.main_class,
            inherits_from: raw.inherits_from,
            asset_index: raw.asset_index,
            assets: raw.assets,
            java_version: raw.java_version,
            downloads: raw.downloads,
            libraries: raw.libraries,
            release_time: raw.release_time,
            time: raw.time,
        }
    }
}

impl From<VersionDescriptor> for RawVersionDescriptor {
    fn from(d: VersionDescriptor) -> Self {
        let (arguments, minecraft_arguments) = d.arguments.into_raw();
        Self {
            id: d.id,
            version_type: d.version_type,
            main_class: d.main_class,
            inherits_from: d.inherits_from,
            asset_index: d.asset_index,
            assets: d.assets,
            java_version: d.java_version,
            downloads: d.downloads,
            libraries: d.libraries,
            arguments,
            minecraft_arguments,
            release_time: d.release_time,
            time: d.time,
        }
    }
}

/// `{objects: {name: {hash, size}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetIndex {
    #[serde(default)]
    pub objects: HashMap<String, AssetObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_to_resources: Option<bool>,
    #[serde(default, rename = "virtual", skip_serializing_if = "Option::is_none")]
    pub is_virtual: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}
