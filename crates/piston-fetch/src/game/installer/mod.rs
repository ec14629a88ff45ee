pub mod config;
pub mod core;
pub mod error;
pub mod modloaders;
pub mod sources;
pub mod types;
pub mod vanilla;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::game::installer::config::EngineConfig;
use crate::game::installer::core::downloader::build_client;
use crate::game::installer::core::fallback::FallbackDownloader;
use crate::game::installer::modloaders::{prepare_loader, LoaderRequest, PreparedLoader};
use crate::game::installer::sources::SourceCatalog;
use crate::game::installer::types::{CancelToken, InstallSpec, Platform, ProgressReporter};
use crate::game::installer::vanilla::{install_with, InstallReport};

pub use vanilla::install_version;

/// Outcome of [`install_loader`].
#[derive(Debug, Clone)]
pub struct LoaderInstall {
    pub loader: PreparedLoader,
    /// Game files for the profile (Fabric/Quilt) or the base game version.
    pub report: InstallReport,
}

/// Prepare a mod loader and install the game files it runs on.
///
/// Profile loaders are installed by their own version id. Installer-jar
/// loaders get the base game version installed next to the downloaded jar.
pub async fn install_loader(
    data_dir: &Path,
    request: &LoaderRequest,
    config: &EngineConfig,
    catalog: &SourceCatalog,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
) -> Result<LoaderInstall> {
    let fetcher = FallbackDownloader::new(build_client(config)?, catalog, config, cancel);

    reporter.start_step(&format!("Preparing {}", request.kind), Some(5));
    let loader = prepare_loader(&fetcher, data_dir, request).await?;

    let version_id = match &loader {
        PreparedLoader::Profile { version_id } => version_id.clone(),
        PreparedLoader::Installer { .. } => request.game_version.clone(),
    };
    let spec = InstallSpec::new(version_id, data_dir);
    let report = install_with(&fetcher, &spec, config, reporter, &Platform::current()).await?;

    Ok(LoaderInstall { loader, report })
}
