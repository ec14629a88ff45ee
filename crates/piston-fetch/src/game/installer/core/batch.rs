use crate::game::installer::core::downloader::Expected;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::core::verify::verify_async;
use crate::game::installer::sources::ResourceClass;
use crate::game::installer::types::{ProgressReporter, ProgressThrottle};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One file to place on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Upstream URL; sources rewrite it per `class`.
    pub url: String,
    pub class: ResourceClass,
    pub target: PathBuf,
    pub expected: Expected,
    /// Higher runs first.
    pub priority: i32,
    pub label: String,
}

impl DownloadTask {
    pub fn request(&self) -> ResourceRequest {
        ResourceRequest {
            url: self.url.clone(),
            class: self.class,
            expected: self.expected.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub label: String,
    pub target: PathBuf,
    pub attempted_sources: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: usize,
    /// Already present and verified.
    pub skipped: usize,
    pub failed: Vec<FailedDownload>,
    pub cancelled: bool,
    /// Local error that stopped the batch; nothing was started after it.
    pub fatal: Option<String>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled && self.fatal.is_none()
    }
}

enum Outcome {
    Downloaded,
    Present,
    Failed(FailedDownload),
    Fatal(FailedDownload),
    NotStarted,
    Halted,
}

/// Runs many single-file fetches with a concurrency bound.
pub struct BatchDownloader {
    fetcher: FallbackDownloader,
    concurrency: usize,
    progress_threshold: f64,
}

impl BatchDownloader {
    pub fn new(fetcher: FallbackDownloader, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            progress_threshold: 0.5,
        }
    }

    pub fn with_progress_threshold(mut self, threshold: f64) -> Self {
        self.progress_threshold = threshold;
        self
    }

    pub async fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BatchReport {
        // One writer per target path
        let mut seen_paths = HashSet::new();
        let mut unique: Vec<DownloadTask> = tasks
            .into_iter()
            .filter(|t| seen_paths.insert(t.target.clone()))
            .collect();
        unique.sort_by(|a, b| b.priority.cmp(&a.priority));

        let total = unique.len();
        let mut report = BatchReport::default();
        if total == 0 {
            return report;
        }

        let finished = Arc::new(AtomicUsize::new(0));
        let throttle = ProgressThrottle::new(self.progress_threshold);
        let cancel = self.fetcher.cancel_token().clone();
        let halted = AtomicBool::new(false);

        let outcomes: Vec<Outcome> = stream::iter(unique)
            .map(|task| {
                let fetcher = &self.fetcher;
                let reporter = reporter.clone();
                let finished = finished.clone();
                let throttle = &throttle;
                let cancel = &cancel;
                let halted = &halted;

                async move {
                    if cancel.is_cancelled() {
                        return Outcome::NotStarted;
                    }
                    if halted.load(Ordering::SeqCst) {
                        return Outcome::Halted;
                    }

                    let outcome = if verify_async(
                        &task.target,
                        task.expected.digest.as_deref(),
                        task.expected.size,
                    )
                    .await
                    {
                        Outcome::Present
                    } else {
                        log::debug!("Downloading {} -> {:?}", task.label, task.target);
                        match fetcher.fetch_file(&task.request(), &task.target, None).await {
                            Ok(_) => Outcome::Downloaded,
                            Err(failure) if failure.is_cancelled() => Outcome::NotStarted,
                            Err(failure) if failure.is_fatal() => {
                                halted.store(true, Ordering::SeqCst);
                                log::error!(
                                    "Stopping downloads, {} hit a local error: {}",
                                    task.label,
                                    failure
                                );
                                Outcome::Fatal(FailedDownload {
                                    label: task.label.clone(),
                                    target: task.target.clone(),
                                    attempted_sources: failure.attempted_sources.clone(),
                                    error: failure.to_string(),
                                })
                            }
                            Err(failure) => {
                                log::warn!("Failed to download {}: {}", task.label, failure);
                                Outcome::Failed(FailedDownload {
                                    label: task.label.clone(),
                                    target: task.target.clone(),
                                    attempted_sources: failure.attempted_sources.clone(),
                                    error: failure.to_string(),
                                })
                            }
                        }
                    };

                    let count = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    let percent = count as f64 / total as f64 * 100.0;
                    if throttle.report(&*reporter, percent).is_some() {
                        reporter.set_message(&format!("Downloading files... ({}/{})", count, total));
                    }
                    if count % 50 == 0 || count == total {
                        log::info!("Batch download progress: {}/{}", count, total);
                    }
                    outcome
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Downloaded => report.downloaded += 1,
                Outcome::Present => report.skipped += 1,
                Outcome::Failed(f) => report.failed.push(f),
                Outcome::Fatal(f) => {
                    report.fatal.get_or_insert_with(|| f.error.clone());
                    report.failed.push(f);
                }
                Outcome::NotStarted => report.cancelled = true,
                Outcome::Halted => {}
            }
        }
        report.cancelled |= cancel.is_cancelled();
        report
    }
}
