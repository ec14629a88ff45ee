use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One published version of a Modrinth project.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModVersion {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub version_number: String,
    #[serde(default)]
    pub game_versions: Vec<String>,
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub files: Vec<ModFile>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
    pub date_published: DateTime<Utc>,
}

impl ModVersion {
    /// The primary file, or the first one when none is flagged.
    pub fn primary_file(&self) -> Option<&ModFile> {
        self.files
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.files.first())
    }

    pub fn required_dependencies(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.dependencies
            .iter()
            .filter(|d| d.kind == RelationKind::Required)
    }

    /// Compatibility context handed to the dependencies of this version.
    pub fn context(&self) -> ModContext {
        ModContext {
            game_versions: self.game_versions.clone(),
            loaders: self.loaders.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub primary: bool,
}

impl ModFile {
    pub fn sha1(&self) -> Option<&str> {
        self.hashes.get("sha1").map(String::as_str)
    }

    /// The server-supplied name, if it is a plain file name that stays
    /// inside the directory it is joined onto.
    pub fn safe_filename(&self) -> Option<&str> {
        let name = self.filename.as_str();
        let unsafe_name = name.is_empty()
            || name.contains(['/', '\\', ':', '\0'])
            || name.starts_with('.');
        (!unsafe_name).then_some(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Required,
    Optional,
    Incompatible,
    Embedded,
}

/// A declared relation from one mod version to another project.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    #[serde(rename = "dependency_type")]
    pub kind: RelationKind,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl DependencyEdge {
    pub fn required_project(project_id: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Required,
            project_id: Some(project_id.into()),
            version_id: None,
            file_name: None,
        }
    }

    pub fn required_version(version_id: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Required,
            project_id: None,
            version_id: Some(version_id.into()),
            file_name: None,
        }
    }

    /// Processed-set identity: the version id when pinned, else the project.
    pub fn key(&self) -> Option<&str> {
        self.version_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.project_id.as_deref().filter(|p| !p.is_empty()))
    }
}

/// Platform of the artifact whose dependencies are being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModContext {
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
}

impl ModContext {
    pub fn new(game_version: impl Into<String>, loader: impl Into<String>) -> Self {
        Self {
            game_versions: vec![game_version.into()],
            loaders: vec![loader.into()],
        }
    }

    fn shares_game_version(&self, version: &ModVersion) -> bool {
        self.game_versions
            .iter()
            .any(|g| version.game_versions.contains(g))
    }

    fn shares_loader(&self, version: &ModVersion) -> bool {
        self.loaders.iter().any(|l| {
            version
                .loaders
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(l))
        })
    }

    /// Pick a version for an unpinned dependency. Game version and loader
    /// must both match first, then game version alone; failing both the
    /// newest published version wins.
    pub fn select<'a>(&self, versions: &'a [ModVersion]) -> Option<&'a ModVersion> {
        if !self.game_versions.is_empty() {
            if !self.loaders.is_empty() {
                let exact = newest(
                    versions
                        .iter()
                        .filter(|v| self.shares_game_version(v) && self.shares_loader(v)),
                );
                if exact.is_some() {
                    return exact;
                }
            }
            let relaxed = newest(versions.iter().filter(|v| self.shares_game_version(v)));
            if relaxed.is_some() {
                return relaxed;
            }
        }
        newest(versions.iter())
    }
}

fn newest<'a>(versions: impl Iterator<Item = &'a ModVersion>) -> Option<&'a ModVersion> {
    versions.max_by_key(|v| v.date_published)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: &str, games: &[&str], loaders: &[&str], day: u32) -> ModVersion {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "project_id": "lib",
            "version_number": id,
            "game_versions": games,
            "loaders": loaders,
            "files": [],
            "dependencies": [],
            "date_published": format!("2024-01-{:02}T00:00:00Z", day),
        }))
        .unwrap()
    }

    #[test]
    fn parses_modrinth_version() {
        let json = r#"{
            "id": "IZskON6d",
            "project_id": "P7dR8mSH",
            "version_number": "0.92.2+1.20.1",
            "game_versions": ["1.20.1"],
            "loaders": ["fabric"],
            "date_published": "2024-06-13T16:38:04.123456Z",
            "files": [
                {"url": "https://cdn.modrinth.com/data/P7dR8mSH/versions/IZskON6d/fabric-api.jar",
                 "filename": "fabric-api.jar",
                 "hashes": {"sha1": "abc", "sha512": "def"},
                 "size": 2097152, "primary": true}
            ],
            "dependencies": [
                {"version_id": null, "project_id": "abc", "file_name": null, "dependency_type": "required"},
                {"project_id": "xyz", "dependency_type": "optional"}
            ]
        }"#;
        let v: ModVersion = serde_json::from_str(json).unwrap();
        assert_eq!(v.primary_file().unwrap().sha1(), Some("abc"));
        assert_eq!(v.required_dependencies().count(), 1);
        assert_eq!(v.dependencies[0].key(), Some("abc"));
    }

    #[test]
    fn edge_key_prefers_version_id() {
        let mut edge = DependencyEdge::required_project("proj");
        assert_eq!(edge.key(), Some("proj"));
        edge.version_id = Some("ver".into());
        assert_eq!(edge.key(), Some("ver"));
        edge.version_id = Some(String::new());
        edge.project_id = None;
        assert_eq!(edge.key(), None);
    }

    #[test]
    fn selects_in_two_tiers() {
        let versions = vec![
            version("forge-new", &["1.20.1"], &["forge"], 20),
            version("fabric-old", &["1.20.1"], &["fabric"], 5),
            version("other-game", &["1.19.2"], &["fabric"], 28),
        ];

        let ctx = ModContext::new("1.20.1", "fabric");
        assert_eq!(ctx.select(&versions).unwrap().id, "fabric-old");

        let ctx = ModContext::new("1.20.1", "quilt");
        assert_eq!(ctx.select(&versions).unwrap().id, "forge-new");

        let ctx = ModContext::new("1.16.5", "fabric");
        assert_eq!(ctx.select(&versions).unwrap().id, "other-game");

        assert!(ModContext::default().select(&[]).is_none());
    }

    #[test]
    fn test_safe_filename() {
        let file = |name: &str| ModFile {
            url: "https://cdn.modrinth.com/data/x/versions/y/f.jar".into(),
            filename: name.into(),
            hashes: HashMap::new(),
            size: None,
            primary: true,
        };
        assert_eq!(file("sodium-0.5.3.jar").safe_filename(), Some("sodium-0.5.3.jar"));
        assert_eq!(file("../escaped.jar").safe_filename(), None);
        assert_eq!(file("sub/dir.jar").safe_filename(), None);
        assert_eq!(file("..\\escaped.jar").safe_filename(), None);
        assert_eq!(file("C:evil.jar").safe_filename(), None);
        assert_eq!(file(".hidden.jar").safe_filename(), None);
        assert_eq!(file("").safe_filename(), None);
    }
}
