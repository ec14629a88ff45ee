//! Download sources and the catalog that orders them for fallback.
//!
//! A source never changes *where* a file lands on disk, only which URL the
//! bytes are requested from. Built-in mirrors are expressed as host rewrite
//! rules scoped to resource classes; custom sources reuse a built-in template
//! with their own base URL.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::game::installer::config::{SourceSettings, DEFAULT_USER_AGENT};

pub const OFFICIAL: &str = "official";
pub const BMCLAPI: &str = "bmclapi";
pub const MCIM: &str = "mcim";

/// Preference order for built-in sources after the primary and custom ones.
pub const BUILTIN_ORDER: [&str; 3] = [OFFICIAL, BMCLAPI, MCIM];

const BMCLAPI_BASE: &str = "https://bmclapi2.bangbang93.com";
const MCIM_BASE: &str = "https://mod.mcimirror.top";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    VersionManifest,
    VersionInfo,
    ClientJar,
    Library,
    AssetIndex,
    AssetObject,
    LoaderMeta,
    LoaderMaven,
    ModrinthApi,
    ModrinthCdn,
    CurseforgeApi,
    CurseforgeCdn,
    Other,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::VersionManifest => "version_manifest",
            ResourceClass::VersionInfo => "version_info",
            ResourceClass::ClientJar => "client_jar",
            ResourceClass::Library => "library",
            ResourceClass::AssetIndex => "asset_index",
            ResourceClass::AssetObject => "asset_object",
            ResourceClass::LoaderMeta => "loader_meta",
            ResourceClass::LoaderMaven => "loader_maven",
            ResourceClass::ModrinthApi => "modrinth_api",
            ResourceClass::ModrinthCdn => "modrinth_cdn",
            ResourceClass::CurseforgeApi => "curseforge_api",
            ResourceClass::CurseforgeCdn => "curseforge_cdn",
            ResourceClass::Other => "other",
        }
    }
}

/// Replace `from` (scheme + host + optional path prefix) with `to` for the
/// listed classes. An empty class list applies to every class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewrite {
    pub classes: Vec<ResourceClass>,
    pub from: String,
    pub to: String,
}

impl HostRewrite {
    fn applies(&self, class: ResourceClass, url: &str) -> bool {
        if !self.classes.is_empty() && !self.classes.contains(&class) {
            return false;
        }
        match url.strip_prefix(self.from.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSource {
    key: String,
    name: String,
    rewrites: Vec<HostRewrite>,
    /// Per-class replacement base; keeps the original path and query.
    overrides: HashMap<ResourceClass, String>,
    include_api_key: bool,
    user_agent: Option<String>,
    /// Set for user-configured sources only.
    priority: Option<i32>,
}

impl DownloadSource {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            rewrites: Vec::new(),
            overrides: HashMap::new(),
            include_api_key: true,
            user_agent: None,
            priority: None,
        }
    }

    pub fn with_rewrite(
        mut self,
        classes: &[ResourceClass],
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.rewrites.push(HostRewrite {
            classes: classes.to_vec(),
            from: trim_slash(&from.into()).to_string(),
            to: trim_slash(&to.into()).to_string(),
        });
        self
    }

    pub fn with_override(mut self, class: ResourceClass, base: impl Into<String>) -> Self {
        self.overrides
            .insert(class, trim_slash(&base.into()).to_string());
        self
    }

    pub fn with_api_key(mut self, include: bool) -> Self {
        self.include_api_key = include;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Mojang, Fabric and Forge origins served as-is.
    pub fn official() -> Self {
        Self::new(OFFICIAL, "Official")
    }

    pub fn bmclapi() -> Self {
        let meta = [
            ResourceClass::VersionManifest,
            ResourceClass::VersionInfo,
            ResourceClass::ClientJar,
            ResourceClass::AssetIndex,
        ];
        let maven = [ResourceClass::Library, ResourceClass::LoaderMaven];
        let base = BMCLAPI_BASE;

        Self::new(BMCLAPI, "BMCLAPI")
            .with_rewrite(&meta, "https://piston-meta.mojang.com", base)
            .with_rewrite(&meta, "https://piston-data.mojang.com", base)
            .with_rewrite(&meta, "https://launchermeta.mojang.com", base)
            .with_rewrite(&meta, "https://launcher.mojang.com", base)
            .with_rewrite(
                &[ResourceClass::AssetObject],
                "https://resources.download.minecraft.net",
                format!("{}/assets", base),
            )
            .with_rewrite(&maven, "https://libraries.minecraft.net", format!("{}/maven", base))
            .with_rewrite(&maven, "https://maven.minecraftforge.net", format!("{}/maven", base))
            .with_rewrite(
                &maven,
                "https://maven.neoforged.net/releases",
                format!("{}/maven", base),
            )
            .with_rewrite(&maven, "https://maven.fabricmc.net", format!("{}/maven", base))
            .with_rewrite(
                &[ResourceClass::LoaderMeta],
                "https://meta.fabricmc.net",
                format!("{}/fabric-meta", base),
            )
            .with_rewrite(
                &[ResourceClass::LoaderMeta],
                "https://meta.quiltmc.org",
                format!("{}/quilt-meta", base),
            )
    }

    /// Mod platform mirror. Never forwards the CurseForge key and rejects
    /// requests without an identifying User-Agent.
    pub fn mcim() -> Self {
        let base = MCIM_BASE;
        Self::new(MCIM, "MCIM")
            .with_rewrite(
                &[ResourceClass::ModrinthApi],
                "https://api.modrinth.com",
                format!("{}/modrinth", base),
            )
            .with_rewrite(&[ResourceClass::ModrinthCdn], "https://cdn.modrinth.com", base)
            .with_rewrite(
                &[ResourceClass::CurseforgeApi],
                "https://api.curseforge.com",
                format!("{}/curseforge", base),
            )
            .with_rewrite(&[ResourceClass::CurseforgeCdn], "https://edge.forgecdn.net", base)
            .with_api_key(false)
            .with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn include_api_key(&self) -> bool {
        self.include_api_key
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn is_custom(&self) -> bool {
        self.priority.is_some()
    }

    /// Map an upstream URL onto this source. URLs no rule covers pass through.
    pub fn transform(&self, class: ResourceClass, url: &str) -> String {
        if let Some(base) = self.overrides.get(&class) {
            if let Ok(parsed) = url::Url::parse(url) {
                let mut out = format!("{}{}", base, parsed.path());
                if let Some(q) = parsed.query() {
                    out.push('?');
                    out.push_str(q);
                }
                return out;
            }
        }

        self.rewrites
            .iter()
            .find(|r| r.applies(class, url))
            .map(|r| format!("{}{}", r.to, &url[r.from.len()..]))
            .unwrap_or_else(|| url.to_string())
    }

    fn rebased(mut self, from_base: &str, to_base: &str) -> Self {
        for rule in &mut self.rewrites {
            if let Some(rest) = rule.to.strip_prefix(from_base) {
                rule.to = format!("{}{}", to_base, rest);
            }
        }
        self
    }
}

fn trim_slash(s: &str) -> &str {
    s.trim_end_matches('/')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceTemplate {
    Official,
    #[default]
    Bmclapi,
    Mcim,
}

fn default_priority() -> i32 {
    100
}

fn default_enabled() -> bool {
    true
}

/// A user-configured mirror that follows one of the built-in URL layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomSourceConfig {
    pub key: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub template: SourceTemplate,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub overrides: HashMap<ResourceClass, String>,
}

impl CustomSourceConfig {
    pub fn build(&self) -> Result<DownloadSource> {
        if self.key.trim().is_empty() {
            bail!("Custom source key must not be empty");
        }
        if BUILTIN_ORDER.contains(&self.key.as_str()) {
            bail!("Custom source key '{}' collides with a built-in source", self.key);
        }
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL for source '{}'", self.key))?;
        let base = trim_slash(&self.base_url);

        let template = match self.template {
            SourceTemplate::Official => DownloadSource::official(),
            SourceTemplate::Bmclapi => DownloadSource::bmclapi().rebased(BMCLAPI_BASE, base),
            SourceTemplate::Mcim => DownloadSource::mcim().rebased(MCIM_BASE, base),
        };

        let user_agent = self.user_agent.clone().or_else(|| template.user_agent.clone());
        let mut source = DownloadSource {
            key: self.key.clone(),
            name: self.name.clone(),
            priority: Some(self.priority),
            user_agent,
            ..template
        };
        for (class, override_base) in &self.overrides {
            source = source.with_override(*class, override_base.clone());
        }
        Ok(source)
    }
}

/// Immutable registry of sources, looked up by key while ordering fallback.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: Vec<Arc<DownloadSource>>,
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SourceCatalog {
    pub fn new(sources: Vec<DownloadSource>) -> Self {
        let mut seen = HashSet::new();
        let sources = sources
            .into_iter()
            .filter(|s| seen.insert(s.key.clone()))
            .map(Arc::new)
            .collect();
        Self { sources }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            DownloadSource::official(),
            DownloadSource::bmclapi(),
            DownloadSource::mcim(),
        ])
    }

    /// Built-ins plus every enabled custom source from settings.
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let mut sources = vec![
            DownloadSource::official(),
            DownloadSource::bmclapi(),
            DownloadSource::mcim(),
        ];
        for custom in settings.custom.iter().filter(|c| c.enabled) {
            sources.push(custom.build()?);
        }
        Ok(Self::new(sources))
    }

    pub fn get(&self, key: &str) -> Option<&Arc<DownloadSource>> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.key.as_str()).collect()
    }

    /// Primary first, then custom sources by descending priority, then the
    /// built-ins in their fixed preference order. Each key appears once.
    pub fn fallback_order(&self, primary: &str) -> Vec<Arc<DownloadSource>> {
        let mut order: Vec<Arc<DownloadSource>> = Vec::with_capacity(self.sources.len());
        let push = |s: &Arc<DownloadSource>, order: &mut Vec<Arc<DownloadSource>>| {
            if !order.iter().any(|o| o.key == s.key) {
                order.push(s.clone());
            }
        };

        if let Some(p) = self.get(primary) {
            push(p, &mut order);
        } else {
            log::warn!("[sources] unknown primary source '{}', using default order", primary);
        }

        let mut custom: Vec<&Arc<DownloadSource>> =
            self.sources.iter().filter(|s| s.is_custom()).collect();
        // sort_by is stable, ties keep registration order
        custom.sort_by(|a, b| b.priority.cmp(&a.priority));
        for s in custom {
            push(s, &mut order);
        }

        for key in BUILTIN_ORDER {
            if let Some(s) = self.get(key) {
                push(s, &mut order);
            }
        }
        for s in self.sources.iter().filter(|s| !s.is_custom()) {
            push(s, &mut order);
        }
        order
    }

    /// Fallback order as configured: just the primary when auto fallback is off.
    pub fn order_for(&self, settings: &SourceSettings) -> Vec<Arc<DownloadSource>> {
        let mut order = self.fallback_order(&settings.primary);
        if !settings.auto_fallback {
            order.truncate(1);
        }
        order
    }
}
