#![allow(dead_code)]

use piston_fetch::game::installer::config::EngineConfig;
use piston_fetch::game::installer::core::downloader::build_client;
use piston_fetch::game::installer::core::fallback::FallbackDownloader;
use piston_fetch::game::installer::sources::{DownloadSource, SourceCatalog};
use piston_fetch::game::installer::types::CancelToken;
use sha1::{Digest, Sha1};
use std::path::Path;
use wiremock::MockServer;

/// Upstream hosts the engine talks to.
pub const UPSTREAM_HOSTS: &[&str] = &[
    "piston-meta.mojang.com",
    "piston-data.mojang.com",
    "libraries.minecraft.net",
    "resources.download.minecraft.net",
    "api.modrinth.com",
    "cdn.modrinth.com",
];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A source that maps `https://<host>/p` to `<server>/<key>/<host>/p`.
pub fn mirror(key: &str, server: &MockServer) -> DownloadSource {
    UPSTREAM_HOSTS
        .iter()
        .fold(DownloadSource::new(key, key.to_uppercase()), |source, host| {
            source.with_rewrite(
                &[],
                format!("https://{}", host),
                format!("{}/{}/{}", server.uri(), key, host),
            )
        })
}

/// Path a mirror serves an upstream URL under.
pub fn mirrored_path(key: &str, upstream: &str) -> String {
    format!("/{}/{}", key, upstream.trim_start_matches("https://"))
}

/// Short delays so retry paths finish quickly.
pub fn fast_config(primary: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sources.primary = primary.to_string();
    config.max_retries_per_source = 0;
    config.retry_base_delay_ms = 5;
    config.request_timeout_secs = 10;
    config.assets.retries = 1;
    config.assets.retry_delay_ms = 5;
    config.sweep.retries = 1;
    config.sweep.backoff_base_ms = 5;
    config
}

pub fn fetcher(
    sources: Vec<DownloadSource>,
    config: &EngineConfig,
    cancel: CancelToken,
) -> FallbackDownloader {
    let client = build_client(config).unwrap();
    FallbackDownloader::new(client, &SourceCatalog::new(sources), config, cancel)
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Every file below `dir`, as paths relative to it.
pub fn files_under(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(dir) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    out.sort();
    out
}
