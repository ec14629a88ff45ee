use super::fabric::ProfileLoader;
use crate::game::installer::config::QUILT_META_URL;
use crate::game::installer::core::fallback::FallbackDownloader;
use crate::game::installer::modloaders::LoaderKind;
use anyhow::Result;
use std::path::Path;

/// Quilt publishes the same meta layout as Fabric under its own host.
const QUILT: ProfileLoader = ProfileLoader {
    kind: LoaderKind::Quilt,
    meta_url: QUILT_META_URL,
};

pub async fn install_profile(
    fetcher: &FallbackDownloader,
    versions_dir: &Path,
    game_version: &str,
    pinned: Option<&str>,
) -> Result<String> {
    QUILT
        .install_profile(fetcher, versions_dir, game_version, pinned)
        .await
}
