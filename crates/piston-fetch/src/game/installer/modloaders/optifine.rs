use crate::game::installer::config::OPTIFINE_BMCLAPI_URL;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::modloaders::{LoaderError, LoaderKind};
use crate::game::installer::sources::ResourceClass;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Entry of the BMCLAPI OptiFine listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OptiFineBuild {
    #[serde(rename = "mcversion")]
    pub game_version: String,
    #[serde(rename = "type")]
    pub edition: String,
    pub patch: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl OptiFineBuild {
    /// `HD_U_I6`
    pub fn version(&self) -> String {
        format!("{}_{}", self.edition, self.patch)
    }

    pub fn is_preview(&self) -> bool {
        self.patch.to_ascii_lowercase().contains("pre")
    }

    pub fn file_name(&self) -> String {
        self.filename.clone().unwrap_or_else(|| {
            format!("OptiFine_{}_{}.jar", self.game_version, self.version())
        })
    }
}

pub fn list_url(game_version: &str) -> String {
    format!("{}/{}", OPTIFINE_BMCLAPI_URL, game_version)
}

pub fn installer_url(game_version: &str, edition: &str, patch: &str) -> String {
    format!("{}/{}/{}/{}", OPTIFINE_BMCLAPI_URL, game_version, edition, patch)
}

pub async fn list_builds(
    fetcher: &FallbackDownloader,
    game_version: &str,
) -> Result<Vec<OptiFineBuild>> {
    let request = ResourceRequest::new(ResourceClass::Other, list_url(game_version));
    let builds = fetcher
        .fetch_json::<Vec<OptiFineBuild>>(&request)
        .await
        .context("Failed to list OptiFine builds")?;
    Ok(builds.value)
}

fn pick_build<'a>(
    builds: &'a [OptiFineBuild],
    game_version: &str,
    pinned: Option<&str>,
) -> Result<&'a OptiFineBuild, LoaderError> {
    match pinned {
        Some(p) => builds
            .iter()
            .find(|b| b.version() == p)
            .ok_or_else(|| LoaderError::UnknownVersion {
                loader: LoaderKind::OptiFine,
                game_version: game_version.to_string(),
                version: p.to_string(),
            }),
        // The listing is oldest first
        None => builds
            .iter()
            .rev()
            .find(|b| !b.is_preview())
            .or_else(|| builds.last())
            .ok_or_else(|| LoaderError::NoVersions {
                loader: LoaderKind::OptiFine,
                game_version: game_version.to_string(),
            }),
    }
}

pub async fn download_installer(
    fetcher: &FallbackDownloader,
    dir: &Path,
    game_version: &str,
    pinned: Option<&str>,
) -> Result<(String, PathBuf)> {
    let builds = list_builds(fetcher, game_version).await?;
    let build = pick_build(&builds, game_version, pinned)?;

    let target = dir.join("optifine").join(build.file_name());
    if !target.exists() {
        let url = installer_url(game_version, &build.edition, &build.patch);
        log::info!("Downloading OptiFine installer from: {}", url);
        let request = ResourceRequest::new(ResourceClass::Other, url);
        fetcher
            .fetch_file(&request, &target, None)
            .await
            .context("Failed to download OptiFine installer")?;
    }
    Ok((build.version(), target))
}
