pub mod installer;
pub mod mods;
pub mod version;

// Re-export commonly used types
pub use installer::config::EngineConfig;
pub use installer::sources::{DownloadSource, ResourceClass, SourceCatalog};
pub use installer::types::{CancelHandle, CancelToken, InstallSpec, Platform, ProgressReporter};
pub use installer::{install_loader, install_version};
pub use mods::{install_mod, DependencyResolver, ModrinthApi};
