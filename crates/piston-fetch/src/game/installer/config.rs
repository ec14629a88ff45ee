//! Engine settings.
//! Read once per top-level operation; nothing re-reads them mid-resolution.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::game::installer::sources::CustomSourceConfig;

pub const REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_USER_AGENT: &str = concat!("piston-fetch/", env!("CARGO_PKG_VERSION"));

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const MOJANG_LIBRARIES_URL: &str = "https://libraries.minecraft.net/";
pub const ASSET_OBJECTS_URL: &str = "https://resources.download.minecraft.net";
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2/versions/loader";
pub const QUILT_META_URL: &str = "https://meta.quiltmc.org/v3/versions/loader";
pub const NEOFORGE_MAVEN_URL: &str = "https://maven.neoforged.net/releases/";
pub const FORGE_MAVEN_URL: &str = "https://maven.minecraftforge.net/";
pub const OPTIFINE_BMCLAPI_URL: &str = "https://bmclapi2.bangbang93.com/optifine";
pub const MODRINTH_API_URL: &str = "https://api.modrinth.com/v2";

pub const MAX_ASSET_CONCURRENCY: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Key of the preferred source, tried first.
    pub primary: String,
    /// When false only the primary source is used.
    pub auto_fallback: bool,
    pub custom: Vec<CustomSourceConfig>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            primary: "official".to_string(),
            auto_fallback: true,
            custom: Vec::new(),
        }
    }
}

/// First bulk pass over asset objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPassConfig {
    pub max_concurrency: usize,
    pub timeout_secs: u64,
    /// Attempts per source, first try included.
    pub retries: u32,
    /// Linear: delay * attempt.
    pub retry_delay_ms: u64,
}

impl Default for AssetPassConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 32,
            timeout_secs: 30,
            retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Second, slower pass over whatever the first pass could not fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// `None` derives half the first-pass concurrency, capped at 8.
    pub max_concurrency: Option<usize>,
    pub timeout_secs: u64,
    pub retries: u32,
    /// Exponential: base * 2^(attempt-1).
    pub backoff_base_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            timeout_secs: 60,
            retries: 5,
            backoff_base_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sources: SourceSettings,
    pub max_retries_per_source: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Whether a 4xx other than 404 moves on to the next source.
    pub fallback_on_client_error: bool,
    pub user_agent: String,
    pub curseforge_api_key: Option<String>,
    pub assets: AssetPassConfig,
    pub sweep: SweepConfig,
    pub library_concurrency: usize,
    pub dependency_concurrency: usize,
    /// Minimum change, in percentage points, before progress is re-emitted.
    pub progress_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: SourceSettings::default(),
            max_retries_per_source: 2,
            retry_base_delay_ms: 1000,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            fallback_on_client_error: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            curseforge_api_key: None,
            assets: AssetPassConfig::default(),
            sweep: SweepConfig::default(),
            library_concurrency: 8,
            dependency_concurrency: 4,
            progress_threshold: 0.5,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse engine configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        Self::from_json_str(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn asset_concurrency(&self) -> usize {
        self.assets.max_concurrency.clamp(1, MAX_ASSET_CONCURRENCY)
    }

    pub fn sweep_concurrency(&self) -> usize {
        match self.sweep.max_concurrency {
            Some(n) => n.clamp(1, MAX_ASSET_CONCURRENCY),
            None => (self.asset_concurrency() / 2).clamp(1, 8),
        }
    }

    pub fn library_concurrency(&self) -> usize {
        self.library_concurrency.max(1)
    }

    pub fn dependency_concurrency(&self) -> usize {
        self.dependency_concurrency.max(1)
    }
}
