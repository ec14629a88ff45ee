use crate::game::installer::core::batch::FailedDownload;
use crate::game::installer::core::library::{is_applicable, MavenCoordinate};
use crate::game::installer::types::{Arch, OsType, Platform};
use crate::game::version::{Library, VersionDescriptor};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const NATIVE_EXTENSIONS: &[&str] = &["dll", "so", "dylib"];

/// Classifier of the native bundle for `platform`, from the OS-keyed
/// `natives` map with `${arch}` substituted.
pub fn native_classifier(library: &Library, platform: &Platform) -> Option<String> {
    let natives = library.natives.as_ref()?;
    natives
        .iter()
        .find(|(key, _)| platform.os.matches_key(key))
        .map(|(_, classifier)| classifier.replace("${arch}", platform.arch.bits()))
}

/// `natives-<os>[-<arch>]` classifiers carried in the coordinate itself
/// (LWJGL 3 style). Anything naming another OS or arch is rejected.
fn coordinate_classifier_matches(classifier: &str, platform: &Platform) -> bool {
    let c = classifier.to_ascii_lowercase();
    let arch_ok = match platform.arch {
        Arch::X64 => !(c.contains("-x86") || c.contains("-arm")),
        Arch::X86 => !(c.contains("-x64") || c.contains("-arm")),
        Arch::Arm64 => !(c.contains("-x86") || c.contains("-x64")) && (!c.contains("-arm") || c.contains("-arm64")),
        Arch::Arm32 => !(c.contains("-x86") || c.contains("-x64") || c.contains("-arm64")),
    };
    let os_ok = match platform.os {
        OsType::Windows => !(c.contains("-linux") || c.contains("-osx") || c.contains("-macos")),
        OsType::Linux => !(c.contains("-windows") || c.contains("-osx") || c.contains("-macos")),
        OsType::MacOS => !(c.contains("-windows") || c.contains("-linux")),
    };
    arch_ok && os_ok
}

/// Local archive holding this library's natives, if it has any for `platform`.
pub fn native_archive_path(
    library: &Library,
    libraries_dir: &Path,
    platform: &Platform,
) -> Option<PathBuf> {
    let coord = MavenCoordinate::parse(&library.name).ok()?;

    if let Some(classifier) = coord.classifier.as_deref() {
        if classifier.starts_with("natives-") && coordinate_classifier_matches(classifier, platform)
        {
            return Some(libraries_dir.join(coord.local_path()));
        }
    }

    let classifier = native_classifier(library, platform)?;
    Some(libraries_dir.join(coord.with_classifier(&classifier).local_path()))
}

fn is_native_entry(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| NATIVE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn should_exclude(entry: &str, exclusions: &[String]) -> bool {
    entry.starts_with("META-INF/") || exclusions.iter().any(|e| entry.starts_with(e.as_str()))
}

/// Unpack native binaries from one archive, flattened to their file names.
/// Returns the number of files written.
pub fn extract_archive(archive: &Path, dest: &Path, exclusions: &[String]) -> Result<usize> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("Failed to open native archive {:?}", archive))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read native archive {:?}", archive))?;

    std::fs::create_dir_all(dest)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();

        if entry.is_dir() || entry.size() == 0 || should_exclude(&name, exclusions) {
            continue;
        }
        if !is_native_entry(&name) {
            continue;
        }
        let Some(file_name) = Path::new(&name).file_name() else {
            continue;
        };

        let out_path = dest.join(file_name);
        let mut out = std::fs::File::create(&out_path)
            .with_context(|| format!("Failed to create {:?}", out_path))?;
        std::io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    log::debug!("Extracted {} native files from {:?}", written, archive);
    Ok(written)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativesReport {
    pub extracted: usize,
    /// Archives that could not be unpacked, one entry per library.
    pub failed: Vec<FailedDownload>,
}

/// Extract every applicable library's natives into `natives_dir`.
/// Archives that are not on disk are skipped with a warning; an archive
/// that cannot be read is recorded against its library and the rest still
/// run.
pub async fn extract_natives(
    descriptor: &VersionDescriptor,
    libraries_dir: &Path,
    natives_dir: &Path,
    platform: &Platform,
) -> Result<NativesReport> {
    let jobs: Vec<(String, PathBuf, Vec<String>)> = descriptor
        .libraries
        .iter()
        .filter(|l| is_applicable(l, platform))
        .filter_map(|l| {
            native_archive_path(l, libraries_dir, platform).map(|p| {
                let exclude = l.extract.as_ref().map(|e| e.exclude.clone()).unwrap_or_default();
                (l.name.clone(), p, exclude)
            })
        })
        .collect();

    if jobs.is_empty() {
        return Ok(NativesReport::default());
    }

    let dest = natives_dir.to_path_buf();
    let report = tokio::task::spawn_blocking(move || -> Result<NativesReport> {
        std::fs::create_dir_all(&dest)
            .with_context(|| format!("Failed to create natives dir {:?}", dest))?;
        let mut report = NativesReport::default();
        for (name, archive, exclude) in jobs {
            if !archive.exists() {
                log::warn!("Native archive missing: {:?}", archive);
                continue;
            }
            match extract_archive(&archive, &dest, &exclude) {
                Ok(n) => report.extracted += n,
                Err(e) => {
                    log::warn!("Failed to extract natives of {}: {:#}", name, e);
                    report.failed.push(FailedDownload {
                        label: name,
                        target: archive,
                        attempted_sources: Vec::new(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        Ok(report)
    })
    .await
    .context("Native extraction task panicked")??;

    log::info!(
        "Extracted {} native files into {:?}",
        report.extracted,
        natives_dir
    );
    Ok(report)
}
