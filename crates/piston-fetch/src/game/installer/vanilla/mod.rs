use crate::game::installer::config::{EngineConfig, VANILLA_MANIFEST_URL};
use crate::game::installer::core::assets::{index_path, AssetDownloader, AssetReport};
use crate::game::installer::core::batch::{BatchDownloader, BatchReport, FailedDownload};
use crate::game::installer::core::downloader::build_client;
use crate::game::installer::core::fallback::{FallbackDownloader, ResourceRequest};
use crate::game::installer::core::library::required_library_tasks;
use crate::game::installer::core::natives::extract_natives;
use crate::game::installer::core::verify::verify_async;
use crate::game::installer::error::FallbackFailure;
use crate::game::installer::sources::{ResourceClass, SourceCatalog};
use crate::game::installer::types::{CancelToken, InstallSpec, Platform, ProgressReporter};
use crate::game::version::merge::{descriptor_path, resolve_version_chain};
use crate::game::version::{AssetIndex, VersionDescriptor, VersionManifest};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub version_id: String,
    /// Child first, ending at the version that owns the client jar.
    pub chain: Vec<String>,
    pub client_jar_downloaded: bool,
    pub libraries: BatchReport,
    pub natives_extracted: usize,
    pub assets: AssetReport,
    pub cancelled: bool,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.libraries.is_complete() && self.assets.is_complete()
    }

    /// Files that could not be fetched from any source.
    pub fn failures(&self) -> impl Iterator<Item = &FailedDownload> {
        self.libraries.failed.iter().chain(self.assets.failed.iter())
    }
}

/// Install a version (vanilla or a loader profile already written under
/// `versions/`) for the current platform.
pub async fn install_version(
    spec: &InstallSpec,
    config: &EngineConfig,
    catalog: &SourceCatalog,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
) -> Result<InstallReport> {
    let client = build_client(config)?;
    let fetcher = FallbackDownloader::new(client, catalog, config, cancel);
    install_with(&fetcher, spec, config, reporter, &Platform::current()).await
}

/// [`install_version`] with an explicit downloader and target platform.
pub async fn install_with(
    fetcher: &FallbackDownloader,
    spec: &InstallSpec,
    config: &EngineConfig,
    reporter: Arc<dyn ProgressReporter>,
    platform: &Platform,
) -> Result<InstallReport> {
    log::info!("Installing Minecraft {}", spec.version_id);
    let cancel = fetcher.cancel_token().clone();
    let mut report = InstallReport {
        version_id: spec.version_id.clone(),
        ..Default::default()
    };

    // 1. Descriptor chain
    reporter.start_step("Fetching version metadata", Some(5));
    if let Err(e) = ensure_descriptor_chain(fetcher, spec).await {
        return cancelled_or(e, report);
    }
    let resolved = resolve_version_chain(&spec.versions_dir(), &spec.version_id).await?;
    report.chain = resolved.chain.clone();
    let descriptor = resolved.descriptor;
    log::info!("Version chain resolved: {:?}", report.chain);

    if cancel.is_cancelled() {
        report.cancelled = true;
        return Ok(report);
    }

    // 2. Client jar
    reporter.start_step("Downloading game client", Some(5));
    let jar_version = resolved_jar_id(&report.chain, &spec.version_id);
    let downloaded = match ensure_client_jar(fetcher, spec, &descriptor, &jar_version).await {
        Ok(downloaded) => downloaded,
        Err(e) => return cancelled_or(e, report),
    };
    report.client_jar_downloaded = downloaded;

    if cancel.is_cancelled() {
        report.cancelled = true;
        return Ok(report);
    }

    // 3. Libraries and natives
    reporter.start_step("Downloading libraries", Some(5));
    let tasks = required_library_tasks(&descriptor, &spec.libraries_dir(), platform)
        .context("Invalid library coordinate in version descriptor")?;
    log::info!("{} library files required", tasks.len());
    report.libraries = BatchDownloader::new(fetcher.clone(), config.library_concurrency())
        .with_progress_threshold(config.progress_threshold)
        .download_all(tasks, reporter.clone())
        .await;

    if let Some(err) = &report.libraries.fatal {
        bail!("Library download stopped by a local error: {}", err);
    }
    if report.libraries.cancelled || cancel.is_cancelled() {
        report.cancelled = true;
        return Ok(report);
    }

    reporter.start_step("Extracting natives", Some(5));
    let natives = extract_natives(
        &descriptor,
        &spec.libraries_dir(),
        &spec.natives_dir(),
        platform,
    )
    .await?;
    report.natives_extracted = natives.extracted;
    report.libraries.failed.extend(natives.failed);

    // 4. Assets
    reporter.start_step("Downloading assets", Some(5));
    let index = match ensure_asset_index(fetcher, spec, &descriptor).await {
        Ok(index) => index,
        Err(e) => return cancelled_or(e, report),
    };
    match index {
        Some(index) => {
            report.assets = AssetDownloader::new(fetcher, config)
                .download_all(&index, &spec.assets_dir(), reporter.clone())
                .await;
            if let Some(err) = &report.assets.fatal {
                bail!("Asset download stopped by a local error: {}", err);
            }
            report.cancelled = report.assets.cancelled;
        }
        None => log::warn!("Version {} declares no asset index", descriptor.id),
    }

    let complete = report.is_complete();
    reporter.done(
        complete,
        (!complete).then_some("Some files could not be downloaded"),
    );
    log::info!(
        "Install of {} finished: {} libraries fetched, {} assets fetched, {} failures",
        spec.version_id,
        report.libraries.downloaded,
        report.assets.downloaded,
        report.failures().count()
    );
    Ok(report)
}

/// A fetch that stopped because the caller cancelled ends the install with
/// a cancelled report; anything else is returned as the error.
fn cancelled_or(err: anyhow::Error, mut report: InstallReport) -> Result<InstallReport> {
    if is_cancellation(&err) {
        log::info!("Install of {} cancelled", report.version_id);
        report.cancelled = true;
        return Ok(report);
    }
    Err(err)
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FallbackFailure>()
        .is_some_and(FallbackFailure::is_cancelled)
}

fn resolved_jar_id(chain: &[String], fallback: &str) -> String {
    chain.last().cloned().unwrap_or_else(|| fallback.to_string())
}

async fn read_local_descriptor(path: &Path) -> Option<VersionDescriptor> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match VersionDescriptor::from_json(&text) {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("Ignoring unreadable descriptor {:?}: {}", path, e);
            None
        }
    }
}

/// Walk `inheritsFrom` from the requested id, fetching any descriptor that is
/// not on disk from the version manifest. The manifest is only fetched when
/// something is missing.
pub async fn ensure_descriptor_chain(fetcher: &FallbackDownloader, spec: &InstallSpec) -> Result<()> {
    let versions_dir = spec.versions_dir();
    let mut manifest: Option<VersionManifest> = None;
    let mut seen = std::collections::HashSet::new();
    let mut next = Some(spec.version_id.clone());

    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            // resolve_version_chain reports the cycle
            break;
        }
        let path = descriptor_path(&versions_dir, &id);
        if let Some(local) = read_local_descriptor(&path).await {
            next = local.inherits_from;
            continue;
        }

        if manifest.is_none() {
            log::info!("Fetching version manifest");
            let request = ResourceRequest::new(ResourceClass::VersionManifest, VANILLA_MANIFEST_URL);
            let fetched = fetcher
                .fetch_json::<VersionManifest>(&request)
                .await
                .context("Failed to download version manifest")?;
            manifest = Some(fetched.value);
        }
        let entry = manifest
            .as_ref()
            .and_then(|m| m.find(&id))
            .with_context(|| format!("Version {} not found in manifest", id))?;

        log::info!("Downloading version descriptor {} -> {:?}", entry.url, path);
        let request = ResourceRequest::new(ResourceClass::VersionInfo, entry.url.clone())
            .expect(entry.sha1.as_deref(), None);
        fetcher
            .fetch_file(&request, &path, None)
            .await
            .with_context(|| format!("Failed to download version descriptor {}", id))?;

        let fetched = read_local_descriptor(&path)
            .await
            .with_context(|| format!("Downloaded descriptor for {} does not parse", id))?;
        next = fetched.inherits_from;
    }
    Ok(())
}

/// Returns true when the jar had to be downloaded.
async fn ensure_client_jar(
    fetcher: &FallbackDownloader,
    spec: &InstallSpec,
    descriptor: &VersionDescriptor,
    jar_version: &str,
) -> Result<bool> {
    let download = descriptor
        .client_download()
        .with_context(|| format!("No client download declared for {}", descriptor.id))?;
    let target = spec.version_jar_path(jar_version);

    if verify_async(&target, download.sha1.as_deref(), download.size).await {
        log::info!("Client jar already present: {:?}", target);
        return Ok(false);
    }

    log::info!("Downloading client jar {} -> {:?}", download.url, target);
    let request = ResourceRequest::new(ResourceClass::ClientJar, download.url.clone())
        .expect(download.sha1.as_deref(), download.size);
    fetcher
        .fetch_file(&request, &target, None)
        .await
        .context("Failed to download client jar")?;
    Ok(true)
}

/// Local or freshly fetched asset index, or `None` if the version has none.
pub async fn ensure_asset_index(
    fetcher: &FallbackDownloader,
    spec: &InstallSpec,
    descriptor: &VersionDescriptor,
) -> Result<Option<AssetIndex>> {
    let Some(index_ref) = descriptor.asset_index.as_ref() else {
        return Ok(None);
    };
    let path = index_path(&spec.assets_dir(), &index_ref.id);

    if !verify_async(&path, index_ref.sha1.as_deref(), index_ref.size).await {
        log::info!("Downloading asset index {} -> {:?}", index_ref.url, path);
        let request = ResourceRequest::new(ResourceClass::AssetIndex, index_ref.url.clone())
            .expect(index_ref.sha1.as_deref(), index_ref.size);
        fetcher
            .fetch_file(&request, &path, None)
            .await
            .with_context(|| format!("Failed to download asset index {}", index_ref.id))?;
    }

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read asset index {:?}", path))?;
    let index: AssetIndex = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse asset index {:?}", path))?;
    Ok(Some(index))
}
