use crate::game::installer::core::verify::sha1_file;
use crate::game::mods::api::ModApi;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What is already installed in one mods directory.
#[derive(Debug, Clone, Default)]
pub struct ModIndex {
    /// Lower-case SHA-1 to file.
    pub by_sha1: HashMap<String, PathBuf>,
    /// Project id to file, for files the API recognised.
    pub by_project: HashMap<String, PathBuf>,
}

impl ModIndex {
    pub fn contains_digest(&self, sha1: &str) -> bool {
        self.by_sha1.contains_key(&sha1.to_ascii_lowercase())
    }

    pub fn project_file(&self, project_id: &str) -> Option<&PathBuf> {
        self.by_project.get(project_id)
    }

    /// Record a file that was just written by the walker.
    pub fn insert(&mut self, sha1: Option<&str>, project_id: &str, path: PathBuf) {
        if let Some(sha1) = sha1 {
            self.by_sha1.insert(sha1.to_ascii_lowercase(), path.clone());
        }
        if !project_id.is_empty() {
            self.by_project.insert(project_id.to_string(), path);
        }
    }
}

fn is_mod_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    name.ends_with(".jar") || name.ends_with(".jar.disabled")
}

/// Hash every mod jar in `dir`. Runs on the blocking pool.
async fn hash_directory(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<(String, PathBuf)>> {
        let mut hashed = Vec::new();
        if !dir.is_dir() {
            return Ok(hashed);
        }
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("Failed to read {:?}", dir))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !is_mod_file(&path) {
                continue;
            }
            match sha1_file(&path) {
                Ok(sha1) => hashed.push((sha1.to_ascii_lowercase(), path)),
                Err(e) => log::warn!("[mods] could not hash {:?}: {}", path, e),
            }
        }
        Ok(hashed)
    })
    .await
    .context("Mod scan task panicked")?
}

/// Index the jars in `dir` by digest and, when the API knows them, by
/// project. A failed lookup leaves a digest-only index.
pub async fn scan_directory(dir: &Path, api: &dyn ModApi) -> Result<ModIndex> {
    let hashed = hash_directory(dir).await?;
    let mut index = ModIndex::default();
    if hashed.is_empty() {
        return Ok(index);
    }

    let sha1s: Vec<String> = hashed.iter().map(|(h, _)| h.clone()).collect();
    let identified = match api.versions_by_hashes(&sha1s).await {
        Ok(map) => map,
        Err(e) => {
            log::warn!(
                "[mods] project lookup failed for {:?}, using digests only: {:#}",
                dir,
                e
            );
            HashMap::new()
        }
    };

    for (sha1, path) in hashed {
        let version = identified
            .get(&sha1)
            .or_else(|| identified.get(&sha1.to_ascii_uppercase()));
        if let Some(version) = version {
            index.by_project.insert(version.project_id.clone(), path.clone());
        }
        index.by_sha1.insert(sha1, path);
    }

    log::debug!(
        "[mods] indexed {:?}: {} files, {} identified",
        dir,
        index.by_sha1.len(),
        index.by_project.len()
    );
    Ok(index)
}
