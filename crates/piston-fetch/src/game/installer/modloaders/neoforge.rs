use super::forge::MavenLoader;
use crate::game::installer::config::NEOFORGE_MAVEN_URL;
use crate::game::installer::core::fallback::FallbackDownloader;
use crate::game::installer::modloaders::{LoaderError, LoaderKind};
use anyhow::Result;
use std::path::{Path, PathBuf};

const NEOFORGE: MavenLoader = MavenLoader {
    kind: LoaderKind::NeoForge,
    repository: NEOFORGE_MAVEN_URL,
    group_path: "net/neoforged",
    artifact: "neoforge",
};

/// NeoForge versions drop the leading `1.`: Minecraft `1.20.4` maps to
/// `20.4.*` and `1.21` to `21.0.*`.
pub fn version_prefix(game_version: &str) -> Option<String> {
    let mut parts = game_version.split('.');
    if parts.next()? != "1" {
        return None;
    }
    let minor = parts.next()?;
    let patch = parts.next().unwrap_or("0");
    Some(format!("{}.{}.", minor, patch))
}

pub fn versions_for_game(all: &[String], game_version: &str) -> Vec<String> {
    let Some(prefix) = version_prefix(game_version) else {
        return Vec::new();
    };
    all.iter()
        .filter(|v| v.starts_with(&prefix))
        .rev()
        .cloned()
        .collect()
}

pub async fn download_installer(
    fetcher: &FallbackDownloader,
    dir: &Path,
    game_version: &str,
    pinned: Option<&str>,
) -> Result<(String, PathBuf)> {
    let available = versions_for_game(&NEOFORGE.list_all(fetcher).await?, game_version);
    let version = match pinned {
        Some(p) => available
            .iter()
            .find(|v| v.as_str() == p)
            .cloned()
            .ok_or_else(|| LoaderError::UnknownVersion {
                loader: LoaderKind::NeoForge,
                game_version: game_version.to_string(),
                version: p.to_string(),
            })?,
        // Prefer a non-beta build when one exists
        None => available
            .iter()
            .find(|v| !v.contains("beta"))
            .or_else(|| available.first())
            .cloned()
            .ok_or_else(|| LoaderError::NoVersions {
                loader: LoaderKind::NeoForge,
                game_version: game_version.to_string(),
            })?,
    };
    let path = NEOFORGE.fetch_installer(fetcher, dir, &version).await?;
    Ok((version, path))
}
