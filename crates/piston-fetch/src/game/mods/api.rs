use crate::game::installer::config::MODRINTH_API_URL;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::sources::ResourceClass;
use crate::game::mods::types::{ModFile, ModVersion};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// The slice of a mod repository API the dependency walker needs.
#[async_trait]
pub trait ModApi: Send + Sync {
    async fn get_version(&self, version_id: &str) -> Result<ModVersion>;

    async fn list_project_versions(&self, project_id: &str) -> Result<Vec<ModVersion>>;

    /// Versions keyed by the SHA-1 of one of their files. Unknown hashes
    /// are simply absent from the map.
    async fn versions_by_hashes(&self, sha1s: &[String]) -> Result<HashMap<String, ModVersion>>;

    /// Download `file` to `target`, verified against its published digest.
    async fn download(&self, file: &ModFile, target: &Path) -> Result<()>;
}

/// Modrinth v2 over the fallback downloader, so mirrors that proxy the
/// API (and its CDN) are used the same way as for game files.
pub struct ModrinthApi {
    fetcher: FallbackDownloader,
    base_url: String,
}

impl ModrinthApi {
    pub fn new(fetcher: FallbackDownloader) -> Self {
        Self {
            fetcher,
            base_url: MODRINTH_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, path: &str) -> ResourceRequest {
        ResourceRequest::new(
            ResourceClass::ModrinthApi,
            format!("{}/{}", self.base_url, path),
        )
    }
}

#[async_trait]
impl ModApi for ModrinthApi {
    async fn get_version(&self, version_id: &str) -> Result<ModVersion> {
        let request = self.request(&format!("version/{}", version_id));
        let fetched = self
            .fetcher
            .fetch_json::<ModVersion>(&request)
            .await
            .with_context(|| format!("Failed to fetch Modrinth version {}", version_id))?;
        Ok(fetched.value)
    }

    async fn list_project_versions(&self, project_id: &str) -> Result<Vec<ModVersion>> {
        let request = self.request(&format!("project/{}/version", project_id));
        let fetched = self
            .fetcher
            .fetch_json::<Vec<ModVersion>>(&request)
            .await
            .with_context(|| format!("Failed to list versions of {}", project_id))?;
        Ok(fetched.value)
    }

    async fn versions_by_hashes(&self, sha1s: &[String]) -> Result<HashMap<String, ModVersion>> {
        if sha1s.is_empty() {
            return Ok(HashMap::new());
        }
        let body = serde_json::json!({
            "hashes": sha1s,
            "algorithm": "sha1",
        });
        let fetched = self
            .fetcher
            .post_json::<HashMap<String, ModVersion>>(&self.request("version_files"), &body)
            .await
            .context("Failed to look up mod files by hash")?;
        log::debug!(
            "[mods] {} of {} hashes identified via '{}'",
            fetched.value.len(),
            sha1s.len(),
            fetched.used_source
        );
        Ok(fetched.value)
    }

    async fn download(&self, file: &ModFile, target: &Path) -> Result<()> {
        let request = ResourceRequest::new(ResourceClass::ModrinthCdn, file.url.clone())
            .expect(file.sha1(), file.size);
        self.fetcher
            .fetch_file(&request, target, None)
            .await
            .with_context(|| format!("Failed to download {}", file.filename))?;
        Ok(())
    }
}
