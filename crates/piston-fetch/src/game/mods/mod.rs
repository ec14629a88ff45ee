pub mod api;
pub mod scan;
pub mod types;
pub mod walker;

use crate::game::installer::config::EngineConfig;
use crate::game::installer::core::downloader::build_client;
use crate::game::installer::core::fallback::FallbackDownloader;
use crate::game::installer::core::verify::verify_async;
use crate::game::installer::sources::SourceCatalog;
use crate::game::installer::types::CancelToken;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub use api::{ModApi, ModrinthApi};
pub use types::{DependencyEdge, ModContext, ModFile, ModVersion, RelationKind};
pub use walker::{DependencyReport, DependencyResolver, UnresolvedDependency};

/// Result of [`install_mod`].
#[derive(Debug, Clone)]
pub struct ModInstall {
    /// Where the requested version's primary file lives, `None` if an
    /// installed file already provided it.
    pub path: Option<PathBuf>,
    pub dependencies: DependencyReport,
}

/// Install one mod version into `mods_dir` together with everything it
/// requires.
pub async fn install_mod_with(
    api: &dyn ModApi,
    version_id: &str,
    mods_dir: &Path,
    concurrency: usize,
    cancel: CancelToken,
) -> Result<ModInstall> {
    let version = api.get_version(version_id).await?;
    let file = version
        .primary_file()
        .ok_or_else(|| anyhow!("Mod version {} has no files", version_id))?;

    let name = file.safe_filename().ok_or_else(|| {
        anyhow!(
            "Mod version {} has an unsafe file name '{}'",
            version_id,
            file.filename
        )
    })?;

    let target = mods_dir.join(name);
    let path = if verify_async(&target, file.sha1(), file.size).await {
        log::info!("[mods] {} already installed", name);
        None
    } else {
        api.download(file, &target).await?;
        Some(target)
    };

    let dependencies = DependencyResolver::new(api, concurrency)
        .with_cancel(cancel)
        .resolve_version(&version, mods_dir)
        .await?;
    Ok(ModInstall { path, dependencies })
}

/// [`install_mod_with`] against Modrinth through the configured sources.
pub async fn install_mod(
    version_id: &str,
    mods_dir: &Path,
    config: &EngineConfig,
    catalog: &SourceCatalog,
    cancel: CancelToken,
) -> Result<ModInstall> {
    let fetcher = FallbackDownloader::new(build_client(config)?, catalog, config, cancel.clone());
    let api = ModrinthApi::new(fetcher);
    install_mod_with(
        &api,
        version_id,
        mods_dir,
        config.dependency_concurrency(),
        cancel,
    )
    .await
}
