//! Bulk asset download.
//!
//! Missing objects go through a fast first pass. Whatever still fails is
//! retried once more in a sweep with fewer workers, a longer timeout and
//! exponential backoff, so a handful of slow objects never hold the first
//! pass hostage.

use crate::game::installer::config::{EngineConfig, ASSET_OBJECTS_URL, MAX_ASSET_CONCURRENCY};
use crate::game::installer::core::batch::FailedDownload;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest, RetryPolicy};
use crate::game::installer::error::FallbackFailure;
use crate::game::installer::sources::ResourceClass;
use crate::game::installer::types::{ProgressReporter, ProgressThrottle};
use crate::game::version::{AssetIndex, AssetObject};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Share of the progress bar given to the first pass.
const FIRST_PASS_SHARE: f64 = 95.0;

/// `objects/<hash[0:2]>/<hash>` under the assets root.
pub fn object_path(assets_dir: &Path, hash: &str) -> PathBuf {
    assets_dir.join("objects").join(hash_prefix(hash)).join(hash)
}

pub fn object_url(hash: &str) -> String {
    format!("{}/{}/{}", ASSET_OBJECTS_URL, hash_prefix(hash), hash)
}

fn hash_prefix(hash: &str) -> &str {
    hash.get(..2).unwrap_or(hash)
}

pub fn index_path(assets_dir: &Path, index_id: &str) -> PathBuf {
    assets_dir.join("indexes").join(format!("{}.json", index_id))
}

fn is_present(path: &Path, size: u64) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() == size)
        .unwrap_or(false)
}

/// Objects not yet on disk with the declared size, deduplicated by hash.
/// Entries with an empty hash are ignored.
pub fn missing_objects(index: &AssetIndex, assets_dir: &Path) -> Vec<(String, AssetObject)> {
    let mut seen = std::collections::HashSet::new();
    let mut missing: Vec<(String, AssetObject)> = index
        .objects
        .iter()
        .filter(|(_, obj)| !obj.hash.trim().is_empty())
        .filter(|(_, obj)| seen.insert(obj.hash.to_ascii_lowercase()))
        .filter(|(_, obj)| !is_present(&object_path(assets_dir, &obj.hash), obj.size))
        .map(|(name, obj)| (name.clone(), obj.clone()))
        .collect();
    missing.sort_by(|a, b| a.0.cmp(&b.0));
    missing
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetReport {
    /// Distinct objects in the index.
    pub total: usize,
    pub present: usize,
    pub downloaded: usize,
    /// Of `downloaded`, how many only succeeded in the sweep.
    pub recovered_in_sweep: usize,
    pub failed: Vec<FailedDownload>,
    pub cancelled: bool,
    /// Local error that stopped the download; no sweep runs after one.
    pub fatal: Option<String>,
}

impl AssetReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled && self.fatal.is_none()
    }
}

struct PassResult {
    succeeded: usize,
    failed: Vec<((String, AssetObject), FallbackFailure)>,
    cancelled: bool,
    fatal: Option<String>,
}

pub struct AssetDownloader {
    first: FallbackDownloader,
    sweep: FallbackDownloader,
    concurrency: usize,
    sweep_concurrency: usize,
    progress_threshold: f64,
}

impl AssetDownloader {
    pub fn new(fetcher: &FallbackDownloader, config: &EngineConfig) -> Self {
        Self {
            first: fetcher.with_policy(RetryPolicy::asset_pass(config)),
            sweep: fetcher.with_policy(RetryPolicy::sweep_pass(config)),
            concurrency: config.asset_concurrency(),
            sweep_concurrency: config.sweep_concurrency(),
            progress_threshold: config.progress_threshold,
        }
    }

    /// Override the first-pass bound, clamped to 1..=128. The sweep runs at
    /// half of it, at most 8.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.concurrency = max_concurrency.clamp(1, MAX_ASSET_CONCURRENCY);
        self.sweep_concurrency = (self.concurrency / 2).clamp(1, 8);
        self
    }

    pub fn concurrency(&self) -> (usize, usize) {
        (self.concurrency, self.sweep_concurrency)
    }

    pub async fn download_all(
        &self,
        index: &AssetIndex,
        assets_dir: &Path,
        reporter: Arc<dyn ProgressReporter>,
    ) -> AssetReport {
        let total = index
            .objects
            .values()
            .filter(|o| !o.hash.trim().is_empty())
            .map(|o| o.hash.to_ascii_lowercase())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let missing = missing_objects(index, assets_dir);
        let mut report = AssetReport {
            total,
            present: total - missing.len(),
            ..Default::default()
        };

        let throttle = ProgressThrottle::new(self.progress_threshold);
        if missing.is_empty() {
            log::info!("[assets] all {} objects present", total);
            throttle.report(&*reporter, 100.0);
            return report;
        }

        log::info!(
            "[assets] {} of {} objects missing, downloading with {} workers",
            missing.len(),
            total,
            self.concurrency
        );
        reporter.start_step("Downloading assets", None);

        let count = missing.len();
        let first = self
            .run_pass(&self.first, missing, assets_dir, self.concurrency, |done| {
                let percent = done as f64 / count as f64 * FIRST_PASS_SHARE;
                throttle.report(&*reporter, percent);
            })
            .await;
        report.downloaded += first.succeeded;

        if first.cancelled || first.fatal.is_some() {
            if let Some(err) = &first.fatal {
                log::error!("[assets] stopped by a local error: {}", err);
            }
            report.cancelled = first.cancelled;
            report.fatal = first.fatal;
            report.failed = to_failed(first.failed, assets_dir);
            return report;
        }

        if !first.failed.is_empty() {
            let retry: Vec<(String, AssetObject)> =
                first.failed.into_iter().map(|(item, _)| item).collect();
            let retry_count = retry.len();
            log::warn!(
                "[assets] {} objects failed, sweeping with {} workers",
                retry_count,
                self.sweep_concurrency
            );
            reporter.set_message(&format!("Retrying {} assets...", retry_count));

            let sweep = self
                .run_pass(&self.sweep, retry, assets_dir, self.sweep_concurrency, |done| {
                    let percent = FIRST_PASS_SHARE
                        + done as f64 / retry_count as f64 * (100.0 - FIRST_PASS_SHARE);
                    throttle.report(&*reporter, percent);
                })
                .await;

            report.downloaded += sweep.succeeded;
            report.recovered_in_sweep = sweep.succeeded;
            report.cancelled = sweep.cancelled;
            report.fatal = sweep.fatal;
            report.failed = to_failed(sweep.failed, assets_dir);
        }

        if report.failed.is_empty() && !report.cancelled {
            throttle.report(&*reporter, 100.0);
            log::info!("[assets] downloaded {} objects", report.downloaded);
        } else {
            log::warn!(
                "[assets] {} objects could not be downloaded",
                report.failed.len()
            );
        }
        report
    }

    async fn run_pass(
        &self,
        fetcher: &FallbackDownloader,
        items: Vec<(String, AssetObject)>,
        assets_dir: &Path,
        concurrency: usize,
        on_done: impl Fn(usize),
    ) -> PassResult {
        let done = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let cancel = fetcher.cancel_token();

        let results: Vec<Option<Result<(), ((String, AssetObject), FallbackFailure)>>> =
            stream::iter(items)
                .map(|(name, obj)| {
                    let done = &done;
                    let halted = &halted;
                    let on_done = &on_done;
                    async move {
                        // Nothing new starts once cancelled or halted
                        if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                            return None;
                        }
                        let request = ResourceRequest::new(ResourceClass::AssetObject, object_url(&obj.hash))
                            .expect(Some(&obj.hash), Some(obj.size));
                        let target = object_path(assets_dir, &obj.hash);
                        let result = match fetcher.fetch_file(&request, &target, None).await {
                            Ok(_) => Ok(()),
                            Err(failure) if failure.is_cancelled() => return None,
                            Err(failure) => {
                                if failure.is_fatal() {
                                    halted.store(true, Ordering::SeqCst);
                                }
                                log::debug!("[assets] {} failed: {}", name, failure);
                                Err(((name, obj), failure))
                            }
                        };
                        on_done(done.fetch_add(1, Ordering::SeqCst) + 1);
                        Some(result)
                    }
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut pass = PassResult {
            succeeded: 0,
            failed: Vec::new(),
            cancelled: false,
            fatal: None,
        };
        for result in results {
            match result {
                Some(Ok(())) => pass.succeeded += 1,
                Some(Err(f)) => {
                    if f.1.is_fatal() && pass.fatal.is_none() {
                        pass.fatal = Some(f.1.to_string());
                    }
                    pass.failed.push(f);
                }
                None if halted.load(Ordering::SeqCst) => {}
                None => pass.cancelled = true,
            }
        }
        pass.cancelled |= cancel.is_cancelled();
        pass
    }
}

fn to_failed(
    failures: Vec<((String, AssetObject), FallbackFailure)>,
    assets_dir: &Path,
) -> Vec<FailedDownload> {
    failures
        .into_iter()
        .map(|((name, obj), failure)| FailedDownload {
            label: name,
            target: object_path(assets_dir, &obj.hash),
            error: failure.to_string(),
            attempted_sources: failure.attempted_sources,
        })
        .collect()
}
