pub mod fabric;
pub mod forge;
pub mod neoforge;
pub mod optifine;
pub mod quilt;

use crate::game::installer::core::fallback::FallbackDownloader;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    Fabric,
    Quilt,
    Forge,
    NeoForge,
    OptiFine,
}

impl LoaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderKind::Fabric => "fabric",
            LoaderKind::Quilt => "quilt",
            LoaderKind::Forge => "forge",
            LoaderKind::NeoForge => "neoforge",
            LoaderKind::OptiFine => "optifine",
        }
    }

    /// Loaders whose install is a descriptor inheriting from the game version.
    pub fn is_profile_based(&self) -> bool {
        matches!(self, LoaderKind::Fabric | LoaderKind::Quilt)
    }
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoaderKind {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fabric" => Ok(LoaderKind::Fabric),
            "quilt" => Ok(LoaderKind::Quilt),
            "forge" => Ok(LoaderKind::Forge),
            "neoforge" => Ok(LoaderKind::NeoForge),
            "optifine" => Ok(LoaderKind::OptiFine),
            other => Err(LoaderError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("unsupported mod loader '{0}'")]
    Unsupported(String),

    #[error("no {loader} versions available for Minecraft {game_version}")]
    NoVersions {
        loader: LoaderKind,
        game_version: String,
    },

    #[error("{loader} version '{version}' is not published for Minecraft {game_version}")]
    UnknownVersion {
        loader: LoaderKind,
        game_version: String,
        version: String,
    },
}

/// What to install: a loader for a game version, optionally pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderRequest {
    pub kind: LoaderKind,
    pub game_version: String,
    /// `None` picks the newest (stable, where the loader marks stability).
    pub loader_version: Option<String>,
}

impl LoaderRequest {
    pub fn new(kind: LoaderKind, game_version: impl Into<String>) -> Self {
        Self {
            kind,
            game_version: game_version.into(),
            loader_version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.loader_version = Some(version.into());
        self
    }
}

/// Result of preparing a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedLoader {
    /// A child descriptor written under `versions/`; install it by id.
    Profile { version_id: String },
    /// An installer jar on disk. Running it is left to the caller.
    Installer {
        loader_version: String,
        path: PathBuf,
    },
}

/// Fetch whatever the loader needs before the game files can be installed.
pub async fn prepare_loader(
    fetcher: &FallbackDownloader,
    data_dir: &Path,
    request: &LoaderRequest,
) -> anyhow::Result<PreparedLoader> {
    let versions_dir = data_dir.join("versions");
    let installers_dir = data_dir.join("cache").join("installers");
    let pinned = request.loader_version.as_deref();

    log::info!(
        "Preparing {} {} for Minecraft {}",
        request.kind,
        pinned.unwrap_or("latest"),
        request.game_version
    );

    match request.kind {
        LoaderKind::Fabric => {
            let version_id =
                fabric::install_profile(fetcher, &versions_dir, &request.game_version, pinned)
                    .await?;
            Ok(PreparedLoader::Profile { version_id })
        }
        LoaderKind::Quilt => {
            let version_id =
                quilt::install_profile(fetcher, &versions_dir, &request.game_version, pinned)
                    .await?;
            Ok(PreparedLoader::Profile { version_id })
        }
        LoaderKind::Forge => {
            let (loader_version, path) =
                forge::download_installer(fetcher, &installers_dir, &request.game_version, pinned)
                    .await?;
            Ok(PreparedLoader::Installer {
                loader_version,
                path,
            })
        }
        LoaderKind::NeoForge => {
            let (loader_version, path) = neoforge::download_installer(
                fetcher,
                &installers_dir,
                &request.game_version,
                pinned,
            )
            .await?;
            Ok(PreparedLoader::Installer {
                loader_version,
                path,
            })
        }
        LoaderKind::OptiFine => {
            let (loader_version, path) = optifine::download_installer(
                fetcher,
                &installers_dir,
                &request.game_version,
                pinned,
            )
            .await?;
            Ok(PreparedLoader::Installer {
                loader_version,
                path,
            })
        }
    }
}
