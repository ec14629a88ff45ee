use crate::game::installer::config::FABRIC_META_URL;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::modloaders::{LoaderError, LoaderKind};
use crate::game::installer::sources::ResourceClass;
use crate::game::version::merge::descriptor_path;
use crate::game::version::VersionDescriptor;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// One entry of `<meta>/<game_version>`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderListing {
    pub loader: LoaderMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderMeta {
    pub version: String,
    #[serde(default)]
    pub stable: Option<bool>,
}

/// Shared by Fabric and Quilt, which publish the same meta layout.
pub(crate) struct ProfileLoader {
    pub kind: LoaderKind,
    /// `.../versions/loader`
    pub meta_url: &'static str,
}

pub(crate) const FABRIC: ProfileLoader = ProfileLoader {
    kind: LoaderKind::Fabric,
    meta_url: FABRIC_META_URL,
};

impl ProfileLoader {
    /// Loader versions for a game version, newest first as published.
    pub async fn list_versions(
        &self,
        fetcher: &FallbackDownloader,
        game_version: &str,
    ) -> Result<Vec<LoaderMeta>> {
        let url = format!("{}/{}", self.meta_url, game_version);
        let request = ResourceRequest::new(ResourceClass::LoaderMeta, url);
        let listing = fetcher
            .fetch_json::<Vec<LoaderListing>>(&request)
            .await
            .with_context(|| format!("Failed to list {} versions", self.kind))?;
        Ok(listing.value.into_iter().map(|l| l.loader).collect())
    }

    async fn pick_version(
        &self,
        fetcher: &FallbackDownloader,
        game_version: &str,
        pinned: Option<&str>,
    ) -> Result<String> {
        let versions = self.list_versions(fetcher, game_version).await?;
        pick_loader_version(self.kind, game_version, &versions, pinned).map_err(Into::into)
    }

    /// Fetch the profile and store it as a child descriptor of the game
    /// version. Returns the profile's version id.
    pub async fn install_profile(
        &self,
        fetcher: &FallbackDownloader,
        versions_dir: &Path,
        game_version: &str,
        pinned: Option<&str>,
    ) -> Result<String> {
        let loader_version = self.pick_version(fetcher, game_version, pinned).await?;
        log::info!("Using {} loader {}", self.kind, loader_version);

        let url = format!(
            "{}/{}/{}/profile/json",
            self.meta_url, game_version, loader_version
        );
        let request = ResourceRequest::new(ResourceClass::LoaderMeta, url);
        let mut profile = fetcher
            .fetch_json::<VersionDescriptor>(&request)
            .await
            .with_context(|| format!("Failed to download {} profile", self.kind))?
            .value;

        if profile.inherits_from.is_none() {
            profile.inherits_from = Some(game_version.to_string());
        }

        let path = descriptor_path(versions_dir, &profile.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string_pretty(&profile)?)
            .await
            .with_context(|| format!("Failed to write {} profile to {:?}", self.kind, path))?;

        log::info!("{} profile written to {:?}", self.kind, path);
        Ok(profile.id)
    }
}

/// Pinned version if published, else the first stable entry, else the first.
pub(crate) fn pick_loader_version(
    kind: LoaderKind,
    game_version: &str,
    versions: &[LoaderMeta],
    pinned: Option<&str>,
) -> Result<String, LoaderError> {
    if let Some(pinned) = pinned {
        return versions
            .iter()
            .find(|v| v.version == pinned)
            .map(|v| v.version.clone())
            .ok_or_else(|| LoaderError::UnknownVersion {
                loader: kind,
                game_version: game_version.to_string(),
                version: pinned.to_string(),
            });
    }

    versions
        .iter()
        .find(|v| v.stable.unwrap_or(false))
        .or_else(|| versions.first())
        .map(|v| v.version.clone())
        .ok_or_else(|| LoaderError::NoVersions {
            loader: kind,
            game_version: game_version.to_string(),
        })
}

pub async fn install_profile(
    fetcher: &FallbackDownloader,
    versions_dir: &Path,
    game_version: &str,
    pinned: Option<&str>,
) -> Result<String> {
    FABRIC
        .install_profile(fetcher, versions_dir, game_version, pinned)
        .await
}
