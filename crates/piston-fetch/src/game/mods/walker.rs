//! Recursive expansion of `required` mod dependencies into files.
//!
//! The walk is breadth-first over an explicit frontier. Each frontier's
//! metadata lookups and downloads run concurrently; bookkeeping between
//! them happens on the walking task only. A dependency is visited at most
//! once per call, keyed by version id when pinned and project id otherwise.

use crate::game::installer::types::CancelToken;
use crate::game::mods::api::ModApi;
use crate::game::mods::scan::{scan_directory, ModIndex};
use crate::game::mods::types::{DependencyEdge, ModContext, ModFile, ModVersion, RelationKind};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyReport {
    /// Dependencies already present in the target directory.
    pub satisfied: usize,
    pub downloaded: Vec<PathBuf>,
    pub unresolved: Vec<UnresolvedDependency>,
    pub cancelled: bool,
}

impl DependencyReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && !self.cancelled
    }
}

/// State owned by one top-level resolution. Dropped when the call returns,
/// so nothing leaks into the next resolution.
#[derive(Default)]
struct ResolutionPass {
    processed: HashSet<String>,
    claimed_projects: HashSet<String>,
    scans: HashMap<PathBuf, ModIndex>,
    report: DependencyReport,
}

impl ResolutionPass {
    /// A directory that cannot be scanned is treated as empty; whatever
    /// then fails to land in it is reported per dependency.
    async fn index_for(&mut self, dir: &Path, api: &dyn ModApi) -> &mut ModIndex {
        if !self.scans.contains_key(dir) {
            let index = match scan_directory(dir, api).await {
                Ok(index) => index,
                Err(e) => {
                    log::warn!("[mods] cannot scan {:?}, assuming it is empty: {:#}", dir, e);
                    ModIndex::default()
                }
            };
            self.scans.insert(dir.to_path_buf(), index);
        }
        self.scans.entry(dir.to_path_buf()).or_default()
    }

    fn unresolved(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        let key = key.into();
        let reason = reason.into();
        log::warn!("[mods] skipping dependency {}: {}", key, reason);
        self.report.unresolved.push(UnresolvedDependency { key, reason });
    }
}

struct Planned {
    version: ModVersion,
    file: ModFile,
    target: PathBuf,
}

pub struct DependencyResolver<'a> {
    api: &'a dyn ModApi,
    concurrency: usize,
    cancel: CancelToken,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(api: &'a dyn ModApi, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve the dependencies of an already installed `root` into `dest`.
    /// The root itself counts as processed.
    pub async fn resolve_version(&self, root: &ModVersion, dest: &Path) -> Result<DependencyReport> {
        let mut pass = ResolutionPass::default();
        pass.processed.insert(root.id.clone());
        if !root.project_id.is_empty() {
            pass.processed.insert(root.project_id.clone());
            pass.claimed_projects.insert(root.project_id.clone());
        }
        let frontier = root
            .required_dependencies()
            .cloned()
            .map(|edge| (edge, root.context()))
            .collect();
        self.walk(pass, frontier, dest).await
    }

    /// Resolve `edges` declared by an artifact running on `context`.
    pub async fn resolve(
        &self,
        edges: &[DependencyEdge],
        context: &ModContext,
        dest: &Path,
    ) -> Result<DependencyReport> {
        let frontier = edges
            .iter()
            .cloned()
            .map(|edge| (edge, context.clone()))
            .collect();
        self.walk(ResolutionPass::default(), frontier, dest).await
    }

    async fn walk(
        &self,
        mut pass: ResolutionPass,
        mut frontier: Vec<(DependencyEdge, ModContext)>,
        dest: &Path,
    ) -> Result<DependencyReport> {
        let mut depth = 0usize;
        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                pass.report.cancelled = true;
                break;
            }
            depth += 1;

            let pending = self.claim(&mut pass, std::mem::take(&mut frontier));
            if pending.is_empty() {
                break;
            }
            log::debug!("[mods] depth {}: {} dependencies", depth, pending.len());

            let api = self.api;
            let lookups: Vec<_> = stream::iter(pending)
                .map(|(key, edge, context)| async move {
                    let found = lookup(api, &edge, &context).await;
                    (key, found)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let index = pass.index_for(dest, api).await.clone();
            let mut planned = Vec::new();
            for (key, found) in lookups {
                match found {
                    Ok(version) => {
                        if let Some(p) = self.plan(&mut pass, &index, &key, version, dest) {
                            planned.push(p);
                        }
                    }
                    Err(reason) => pass.unresolved(key, reason),
                }
            }

            if self.cancel.is_cancelled() {
                pass.report.cancelled = true;
                break;
            }

            let results: Vec<_> = stream::iter(planned)
                .map(|p| async move {
                    let outcome = api.download(&p.file, &p.target).await;
                    (p, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (p, outcome) in results {
                match outcome {
                    Ok(()) => {
                        log::info!("[mods] installed dependency {:?}", p.target);
                        pass.index_for(dest, api).await.insert(
                            p.file.sha1(),
                            &p.version.project_id,
                            p.target.clone(),
                        );
                        pass.report.downloaded.push(p.target);
                        // Narrow compatibility to the file just installed
                        let context = p.version.context();
                        frontier.extend(
                            p.version
                                .required_dependencies()
                                .cloned()
                                .map(|edge| (edge, context.clone())),
                        );
                    }
                    Err(e) => pass.unresolved(p.version.id.clone(), format!("{:#}", e)),
                }
            }
        }

        let report = pass.report;
        log::info!(
            "[mods] dependencies: {} satisfied, {} downloaded, {} unresolved",
            report.satisfied,
            report.downloaded.len(),
            report.unresolved.len()
        );
        Ok(report)
    }

    /// Keep the `required` edges that have not been seen in this pass.
    fn claim(
        &self,
        pass: &mut ResolutionPass,
        frontier: Vec<(DependencyEdge, ModContext)>,
    ) -> Vec<(String, DependencyEdge, ModContext)> {
        let mut pending = Vec::new();
        for (edge, context) in frontier {
            if edge.kind != RelationKind::Required {
                continue;
            }
            let Some(key) = edge.key().map(str::to_string) else {
                pass.unresolved("unknown", "dependency names neither a version nor a project");
                continue;
            };
            if pass.processed.insert(key.clone()) {
                pending.push((key, edge, context));
            }
        }
        pending
    }

    fn plan(
        &self,
        pass: &mut ResolutionPass,
        index: &ModIndex,
        key: &str,
        version: ModVersion,
        dest: &Path,
    ) -> Option<Planned> {
        pass.processed.insert(version.id.clone());
        if !version.project_id.is_empty() && !pass.claimed_projects.insert(version.project_id.clone()) {
            log::debug!("[mods] project {} already handled", version.project_id);
            return None;
        }

        let Some(file) = version.primary_file().cloned() else {
            pass.unresolved(key, "version has no files");
            return None;
        };

        if file.sha1().is_some_and(|h| index.contains_digest(h)) {
            log::debug!("[mods] {} satisfied by digest", key);
            pass.report.satisfied += 1;
            return None;
        }
        if let Some(existing) = index.project_file(&version.project_id) {
            log::debug!("[mods] {} satisfied by installed {:?}", key, existing);
            pass.report.satisfied += 1;
            return None;
        }

        let Some(name) = file.safe_filename() else {
            pass.unresolved(key, format!("unsafe file name '{}'", file.filename));
            return None;
        };

        let target = dest.join(name);
        Some(Planned {
            version,
            file,
            target,
        })
    }
}

async fn lookup(
    api: &dyn ModApi,
    edge: &DependencyEdge,
    context: &ModContext,
) -> Result<ModVersion, String> {
    if let Some(version_id) = edge.version_id.as_deref().filter(|v| !v.is_empty()) {
        return api
            .get_version(version_id)
            .await
            .map_err(|e| format!("{:#}", e));
    }

    let project_id = edge.project_id.as_deref().unwrap_or_default();
    let versions = api
        .list_project_versions(project_id)
        .await
        .map_err(|e| format!("{:#}", e))?;
    context
        .select(&versions)
        .cloned()
        .ok_or_else(|| format!("project {} has no published versions", project_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::core::verify::sha1_file;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeApi {
        versions: HashMap<String, ModVersion>,
        projects: HashMap<String, Vec<ModVersion>>,
        known_hashes: HashMap<String, ModVersion>,
        downloads: AtomicUsize,
        listed: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn add(&mut self, version: ModVersion) {
            self.versions.insert(version.id.clone(), version.clone());
            self.projects
                .entry(version.project_id.clone())
                .or_default()
                .push(version);
        }
    }

    #[async_trait]
    impl ModApi for FakeApi {
        async fn get_version(&self, version_id: &str) -> Result<ModVersion> {
            self.versions
                .get(version_id)
                .cloned()
                .ok_or_else(|| anyhow!("404 for {}", version_id))
        }

        async fn list_project_versions(&self, project_id: &str) -> Result<Vec<ModVersion>> {
            self.listed.lock().unwrap().push(project_id.to_string());
            Ok(self.projects.get(project_id).cloned().unwrap_or_default())
        }

        async fn versions_by_hashes(
            &self,
            sha1s: &[String],
        ) -> Result<HashMap<String, ModVersion>> {
            Ok(sha1s
                .iter()
                .filter_map(|h| self.known_hashes.get(h).map(|v| (h.clone(), v.clone())))
                .collect())
        }

        async fn download(&self, file: &ModFile, target: &Path) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if file.url.contains("broken") {
                return Err(anyhow!("all sources failed"));
            }
            std::fs::create_dir_all(target.parent().unwrap())?;
            std::fs::write(target, file.url.as_bytes())?;
            Ok(())
        }
    }

    fn version(id: &str, project: &str, deps: Vec<DependencyEdge>) -> ModVersion {
        version_with_hash(id, project, deps, &format!("{}-sha1", id))
    }

    fn version_with_hash(
        id: &str,
        project: &str,
        deps: Vec<DependencyEdge>,
        sha1: &str,
    ) -> ModVersion {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "project_id": project,
            "version_number": "1.0",
            "game_versions": ["1.20.1"],
            "loaders": ["fabric"],
            "date_published": "2024-01-01T00:00:00Z",
            "files": [{
                "url": format!("https://cdn.modrinth.com/data/{}/{}.jar", project, id),
                "filename": format!("{}.jar", project),
                "hashes": {"sha1": sha1},
                "primary": true
            }],
            "dependencies": deps,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn cycle_terminates_and_visits_each_once() {
        let mut api = FakeApi::default();
        api.add(version("a1", "A", vec![DependencyEdge::required_project("B")]));
        api.add(version("b1", "B", vec![DependencyEdge::required_project("A")]));

        let dir = tempdir().unwrap();
        let resolver = DependencyResolver::new(&api, 4);
        let report = resolver
            .resolve(
                &[DependencyEdge::required_project("A")],
                &ModContext::new("1.20.1", "fabric"),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.downloaded.len(), 2);
        assert!(report.is_complete());
        assert_eq!(api.downloads.load(Ordering::SeqCst), 2);
        let mut listed = api.listed.lock().unwrap().clone();
        listed.sort();
        assert_eq!(listed, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn root_is_not_downloaded_again() {
        let mut api = FakeApi::default();
        let root = version("a1", "A", vec![DependencyEdge::required_version("b1")]);
        api.add(root.clone());
        api.add(version("b1", "B", vec![DependencyEdge::required_version("a1")]));

        let dir = tempdir().unwrap();
        let report = DependencyResolver::new(&api, 2)
            .resolve_version(&root, dir.path())
            .await
            .unwrap();

        assert_eq!(report.downloaded, vec![dir.path().join("B.jar")]);
        assert_eq!(api.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn installed_digest_satisfies_without_download() {
        let dir = tempdir().unwrap();
        let installed = dir.path().join("renamed-lib.jar");
        std::fs::write(&installed, b"library bytes").unwrap();
        let sha1 = sha1_file(&installed).unwrap();

        let mut api = FakeApi::default();
        api.add(version_with_hash("lib1", "LIB", vec![], &sha1));

        let report = DependencyResolver::new(&api, 2)
            .resolve(
                &[DependencyEdge::required_project("LIB")],
                &ModContext::new("1.20.1", "fabric"),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.satisfied, 1);
        assert!(report.downloaded.is_empty());
        assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn installed_project_satisfies_without_download() {
        let dir = tempdir().unwrap();
        let installed = dir.path().join("lib-0.9.jar.disabled");
        std::fs::write(&installed, b"older build").unwrap();
        let sha1 = sha1_file(&installed).unwrap();

        let mut api = FakeApi::default();
        api.add(version("lib2", "LIB", vec![]));
        api.known_hashes
            .insert(sha1.clone(), version_with_hash("lib1", "LIB", vec![], &sha1));

        let report = DependencyResolver::new(&api, 2)
            .resolve(
                &[DependencyEdge::required_project("LIB")],
                &ModContext::default(),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.satisfied, 1);
        assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_reported_not_fatal() {
        let mut api = FakeApi::default();
        let mut broken = version("x1", "X", vec![]);
        broken.files[0].url = "https://broken.example/x.jar".into();
        api.add(broken);
        api.add(version("y1", "Y", vec![]));

        let dir = tempdir().unwrap();
        let edges = vec![
            DependencyEdge::required_project("X"),
            DependencyEdge::required_project("Y"),
            DependencyEdge::required_version("missing"),
            DependencyEdge {
                kind: RelationKind::Optional,
                project_id: Some("Z".into()),
                version_id: None,
                file_name: None,
            },
        ];
        let report = DependencyResolver::new(&api, 3)
            .resolve(&edges, &ModContext::default(), dir.path())
            .await
            .unwrap();

        assert_eq!(report.downloaded, vec![dir.path().join("Y.jar")]);
        let mut keys: Vec<_> = report.unresolved.iter().map(|u| u.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["missing", "x1"]);
        assert!(!api.listed.lock().unwrap().contains(&"Z".to_string()));
    }

    #[tokio::test]
    async fn unreadable_destination_is_reported_per_dependency() {
        let mut api = FakeApi::default();
        api.add(version("a1", "A", vec![]));

        let dir = tempdir().unwrap();
        let not_a_dir = dir.path().join("mods");
        std::fs::write(&not_a_dir, b"regular file").unwrap();

        let report = DependencyResolver::new(&api, 1)
            .resolve(
                &[DependencyEdge::required_project("A")],
                &ModContext::default(),
                &not_a_dir,
            )
            .await
            .unwrap();

        assert!(report.downloaded.is_empty());
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].key, "a1");
    }

    #[tokio::test]
    async fn unsafe_dependency_name_is_not_written() {
        let mut api = FakeApi::default();
        let mut evil = version("e1", "E", vec![]);
        evil.files[0].filename = "../escaped.jar".into();
        api.add(evil);

        let root = tempdir().unwrap();
        let mods = root.path().join("mods");
        std::fs::create_dir_all(&mods).unwrap();
        let report = DependencyResolver::new(&api, 1)
            .resolve(&[DependencyEdge::required_project("E")], &ModContext::default(), &mods)
            .await
            .unwrap();

        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
        assert!(!root.path().join("escaped.jar").exists());
    }

    #[tokio::test]
    async fn cancelled_walk_downloads_nothing() {
        let mut api = FakeApi::default();
        api.add(version("a1", "A", vec![]));
        let (handle, token) = CancelToken::pair();
        handle.cancel();

        let dir = tempdir().unwrap();
        let report = DependencyResolver::new(&api, 1)
            .with_cancel(token)
            .resolve(
                &[DependencyEdge::required_project("A")],
                &ModContext::default(),
                dir.path(),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(api.downloads.load(Ordering::SeqCst), 0);
    }
}
