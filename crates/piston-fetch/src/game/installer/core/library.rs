use crate::game::installer::config::MOJANG_LIBRARIES_URL;
use crate::game::installer::core::batch::DownloadTask;
use crate::game::installer::core::downloader::Expected;
use crate::game::installer::core::natives::native_classifier;
use crate::game::installer::core::verify::verify_async;
use crate::game::installer::sources::ResourceClass;
use crate::game::installer::types::Platform;
use crate::game::version::{Library, Rule, RuleAction, VersionDescriptor};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

const PRIMARY_PRIORITY: i32 = 10;
const NATIVE_PRIORITY: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinateError {
    #[error("invalid Maven coordinate '{0}': expected group:artifact:version[:classifier][@ext]")]
    Malformed(String),
}

/// `group:artifact:version[:classifier][@extension]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MavenCoordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
    pub classifier: Option<String>,
    pub extension: String,
}

impl MavenCoordinate {
    pub fn parse(name: &str) -> Result<Self, CoordinateError> {
        let malformed = || CoordinateError::Malformed(name.to_string());
        let (body, at_ext) = match name.split_once('@') {
            Some((b, e)) => (b, Some(e)),
            None => (name, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        if !(3..=4).contains(&parts.len()) || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(malformed());
        }
        if at_ext.is_some_and(|e| e.trim().is_empty()) {
            return Err(malformed());
        }

        let artifact = parts[1].to_string();
        let extension = match at_ext {
            Some("$extension") => "zip".to_string(),
            Some(ext) => ext.to_string(),
            None if artifact == "neoform" || artifact == "mcp_config" => "zip".to_string(),
            None => "jar".to_string(),
        };

        Ok(Self {
            group: parts[0].to_string(),
            artifact,
            version: parts[2].to_string(),
            classifier: parts.get(3).map(|c| c.to_string()),
            extension,
        })
    }

    pub fn with_classifier(&self, classifier: &str) -> Self {
        Self {
            classifier: Some(classifier.to_string()),
            ..self.clone()
        }
    }

    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}-{}-{}.{}",
                self.artifact, self.version, c, self.extension
            ),
            None => format!("{}-{}.{}", self.artifact, self.version, self.extension),
        }
    }

    /// Forward-slash repository path, e.g. `com/mojang/brigadier/1.1.8/brigadier-1.1.8.jar`.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.file_name()
        )
    }

    /// The same path as a [`PathBuf`] with platform separators.
    pub fn local_path(&self) -> PathBuf {
        self.relative_path().split('/').collect()
    }

    pub fn url_in(&self, repository: &str) -> String {
        format!("{}/{}", repository.trim_end_matches('/'), self.relative_path())
    }
}

impl fmt::Display for MavenCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{}", c)?;
        }
        write!(f, "@{}", self.extension)
    }
}

/// Relative on-disk path of a library coordinate under `libraries/`.
pub fn resolve_library_path(name: &str) -> Result<PathBuf, CoordinateError> {
    Ok(MavenCoordinate::parse(name)?.local_path())
}

fn rule_matches(rule: &Rule, platform: &Platform) -> bool {
    // No launcher features are enabled while resolving files.
    if let Some(features) = &rule.features {
        if features.values().any(|required| *required) {
            return false;
        }
    }

    let Some(os) = &rule.os else {
        return true;
    };

    if let Some(name) = os.name.as_deref() {
        if !platform.os.matches_key(name) {
            return false;
        }
    }
    if let Some(arch) = os.arch.as_deref() {
        if arch != platform.arch.rule_name() {
            return false;
        }
    }
    if let Some(pattern) = os.version.as_deref() {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&platform.os_version) => {}
            Ok(_) => return false,
            Err(e) => {
                log::warn!("Ignoring rule with invalid os.version regex '{}': {}", pattern, e);
                return false;
            }
        }
    }
    true
}

/// Fold over the rule list; the last rule that matches decides.
/// Libraries without rules, or whose rules never match, are allowed.
pub fn check_rules(rules: &[Rule], platform: &Platform) -> bool {
    rules.iter().fold(true, |allowed, rule| {
        if rule_matches(rule, platform) {
            rule.action == RuleAction::Allow
        } else {
            allowed
        }
    })
}

pub fn is_applicable(library: &Library, platform: &Platform) -> bool {
    library
        .rules
        .as_deref()
        .map_or(true, |rules| check_rules(rules, platform))
}

fn repository_url(library: &Library) -> &str {
    library
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(MOJANG_LIBRARIES_URL)
}

/// Primary and native download tasks for one library. Applicability is not
/// checked here.
pub fn library_tasks(
    library: &Library,
    libraries_dir: &Path,
    platform: &Platform,
) -> Result<Vec<DownloadTask>, CoordinateError> {
    let coord = MavenCoordinate::parse(&library.name)?;
    let mut tasks = Vec::new();

    let has_downloads = library.downloads.is_some();
    let classifier = native_classifier(library, platform);

    // Primary artifact
    match library.artifact() {
        Some(artifact) => {
            let url = artifact.url.as_deref().map(str::trim).unwrap_or("");
            if url.is_empty() {
                log::debug!("Library {} has no download URL, skipping", library.name);
            } else {
                tasks.push(DownloadTask {
                    url: url.to_string(),
                    class: ResourceClass::Library,
                    target: libraries_dir.join(coord.local_path()),
                    expected: Expected::new(
                        artifact.sha1.as_deref(),
                        artifact.size,
                    ),
                    priority: PRIMARY_PRIORITY,
                    label: library.name.clone(),
                });
            }
        }
        // Libraries declared with only classifiers have no primary jar.
        None if has_downloads => {}
        None if classifier.is_some() => {}
        None => tasks.push(DownloadTask {
            url: coord.url_in(repository_url(library)),
            class: ResourceClass::Library,
            target: libraries_dir.join(coord.local_path()),
            expected: Expected::new(
                library.sha1.as_deref(),
                library.size,
            ),
            priority: PRIMARY_PRIORITY,
            label: library.name.clone(),
        }),
    }

    // Native artifact
    if let Some(classifier) = classifier {
        let native = coord.with_classifier(&classifier);
        let target = libraries_dir.join(native.local_path());
        match library.classifier(&classifier) {
            Some(artifact) => {
                if let Some(url) = artifact.url.as_deref().filter(|u| !u.trim().is_empty()) {
                    tasks.push(DownloadTask {
                        url: url.to_string(),
                        class: ResourceClass::Library,
                        target,
                        expected: Expected::new(
                            artifact.sha1.as_deref(),
                            artifact.size,
                        ),
                        priority: NATIVE_PRIORITY,
                        label: format!("{}:{}", library.name, classifier),
                    });
                }
            }
            None if !has_downloads => tasks.push(DownloadTask {
                url: native.url_in(repository_url(library)),
                class: ResourceClass::Library,
                target,
                expected: Expected::none(),
                priority: NATIVE_PRIORITY,
                label: format!("{}:{}", library.name, classifier),
            }),
            None => log::warn!(
                "Library {} declares native classifier '{}' without a download",
                library.name,
                classifier
            ),
        }
    }

    Ok(tasks)
}

/// Every applicable library's tasks, before any presence check.
pub fn required_library_tasks(
    descriptor: &VersionDescriptor,
    libraries_dir: &Path,
    platform: &Platform,
) -> Result<Vec<DownloadTask>, CoordinateError> {
    let mut tasks = Vec::new();
    for library in descriptor
        .libraries
        .iter()
        .filter(|l| is_applicable(l, platform))
    {
        tasks.extend(library_tasks(library, libraries_dir, platform)?);
    }
    Ok(tasks)
}

/// Tasks whose file is absent or fails its declared digest.
pub async fn missing_library_tasks(
    descriptor: &VersionDescriptor,
    libraries_dir: &Path,
    platform: &Platform,
    concurrency: usize,
) -> Result<Vec<DownloadTask>> {
    let required = required_library_tasks(descriptor, libraries_dir, platform)?;

    let checked: Vec<(DownloadTask, bool)> = stream::iter(required)
        .map(|task| async move {
            let present = verify_async(
                &task.target,
                task.expected.digest.as_deref(),
                task.expected.size,
            )
            .await;
            (task, present)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    Ok(checked
        .into_iter()
        .filter_map(|(task, present)| (!present).then_some(task))
        .collect())
}

/// Applicable libraries with at least one artifact missing or corrupt.
pub async fn missing_libraries(
    descriptor: &VersionDescriptor,
    libraries_dir: &Path,
    platform: &Platform,
) -> Result<Vec<Library>> {
    let mut missing = Vec::new();
    for library in descriptor
        .libraries
        .iter()
        .filter(|l| is_applicable(l, platform))
    {
        for task in library_tasks(library, libraries_dir, platform)? {
            if !verify_async(&task.target, task.expected.digest.as_deref(), task.expected.size)
                .await
            {
                missing.push(library.clone());
                break;
            }
        }
    }
    Ok(missing)
}
