use crate::game::installer::config::FORGE_MAVEN_URL;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::modloaders::{LoaderError, LoaderKind};
use crate::game::installer::sources::ResourceClass;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub(crate) struct MavenMetadata {
    versioning: MavenVersioning,
}

#[derive(Debug, Deserialize)]
struct MavenVersioning {
    versions: MavenVersionList,
}

#[derive(Debug, Deserialize)]
struct MavenVersionList {
    #[serde(default)]
    version: Vec<String>,
}

impl MavenMetadata {
    pub(crate) fn parse(xml: &str) -> Result<Self> {
        serde_xml_rs::from_str(xml).context("Failed to parse maven-metadata.xml")
    }

    pub(crate) fn versions(&self) -> &[String] {
        &self.versioning.versions.version
    }
}

/// A Maven-hosted loader that ships an installer jar.
pub(crate) struct MavenLoader {
    pub kind: LoaderKind,
    /// Repository base with trailing slash.
    pub repository: &'static str,
    pub group_path: &'static str,
    pub artifact: &'static str,
}

pub(crate) const FORGE: MavenLoader = MavenLoader {
    kind: LoaderKind::Forge,
    repository: FORGE_MAVEN_URL,
    group_path: "net/minecraftforge",
    artifact: "forge",
};

impl MavenLoader {
    pub fn metadata_url(&self) -> String {
        format!(
            "{}{}/{}/maven-metadata.xml",
            self.repository, self.group_path, self.artifact
        )
    }

    pub fn installer_url(&self, full_version: &str) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.repository,
            self.group_path,
            self.artifact,
            full_version,
            self.installer_file_name(full_version)
        )
    }

    pub fn installer_file_name(&self, full_version: &str) -> String {
        format!("{}-{}-installer.jar", self.artifact, full_version)
    }

    /// All published versions, in repository order (oldest first).
    pub async fn list_all(&self, fetcher: &FallbackDownloader) -> Result<Vec<String>> {
        let request = ResourceRequest::new(ResourceClass::LoaderMaven, self.metadata_url());
        let xml = fetcher
            .fetch_text(&request)
            .await
            .with_context(|| format!("Failed to fetch {} version list", self.kind))?;
        Ok(MavenMetadata::parse(&xml.value)?.versions().to_vec())
    }

    /// Download the installer for `full_version` into `dir`.
    pub async fn fetch_installer(
        &self,
        fetcher: &FallbackDownloader,
        dir: &Path,
        full_version: &str,
    ) -> Result<PathBuf> {
        let target = dir
            .join(self.kind.as_str())
            .join(self.installer_file_name(full_version));
        if target.exists() {
            log::info!("Using cached {} installer: {:?}", self.kind, target);
            return Ok(target);
        }

        let url = self.installer_url(full_version);
        log::info!("Downloading {} installer from: {}", self.kind, url);
        let request = ResourceRequest::new(ResourceClass::LoaderMaven, url);
        fetcher
            .fetch_file(&request, &target, None)
            .await
            .with_context(|| format!("Failed to download {} installer", self.kind))?;
        Ok(target)
    }
}

/// Forge publishes `<mc>-<forge>` (older builds add a `-<mc>` branch suffix).
pub fn versions_for_game(all: &[String], game_version: &str) -> Vec<String> {
    let prefix = format!("{}-", game_version);
    all.iter()
        .filter(|v| v.starts_with(&prefix))
        .rev()
        .cloned()
        .collect()
}

fn resolve_full_version(
    available: &[String],
    game_version: &str,
    pinned: Option<&str>,
) -> Result<String, LoaderError> {
    match pinned {
        Some(p) => {
            let full = if p.starts_with(&format!("{}-", game_version)) {
                p.to_string()
            } else {
                format!("{}-{}", game_version, p)
            };
            available
                .iter()
                .find(|v| **v == full || v.starts_with(&format!("{}-", full)))
                .cloned()
                .ok_or_else(|| LoaderError::UnknownVersion {
                    loader: LoaderKind::Forge,
                    game_version: game_version.to_string(),
                    version: p.to_string(),
                })
        }
        None => available.first().cloned().ok_or_else(|| LoaderError::NoVersions {
            loader: LoaderKind::Forge,
            game_version: game_version.to_string(),
        }),
    }
}

/// Returns the chosen Forge version (without the game prefix) and the jar.
pub async fn download_installer(
    fetcher: &FallbackDownloader,
    dir: &Path,
    game_version: &str,
    pinned: Option<&str>,
) -> Result<(String, PathBuf)> {
    let available = versions_for_game(&FORGE.list_all(fetcher).await?, game_version);
    let full = resolve_full_version(&available, game_version, pinned)?;
    let path = FORGE.fetch_installer(fetcher, dir, &full).await?;
    let loader_version = full
        .strip_prefix(&format!("{}-", game_version))
        .unwrap_or(&full)
        .to_string();
    Ok((loader_version, path))
}
