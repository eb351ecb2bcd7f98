//! Filter-directory poller.
//!
//! Each configured directory holds filters of one type. A file's stem is the
//! filter name; its content checksum decides whether it changed.

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{FilterError, Result};
use crate::filters::{FilterId, FilterType};
use crate::loader::{checksum, CacheKey, CompileRequest, FilterLoader};
use crate::poller::{CycleReport, PollCycle, WakeSource};
use crate::registry::{FilterRegistry, Origin, Slot};

/// A watched directory and the filter type of everything in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirectory {
    pub path: PathBuf,
    pub filter_type: FilterType,
}

impl SourceDirectory {
    pub fn new(path: impl Into<PathBuf>, filter_type: FilterType) -> Self {
        Self {
            path: path.into(),
            filter_type,
        }
    }
}

/// Decides which files in a watched directory are filter sources.
pub trait FilenamePredicate: Send + Sync {
    fn accept(&self, path: &Path) -> bool;
}

impl<F> FilenamePredicate for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn accept(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Accepts files with one extension, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct ExtensionPredicate {
    extension: String,
}

impl ExtensionPredicate {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }
}

impl Default for ExtensionPredicate {
    fn default() -> Self {
        Self::new("filter")
    }
}

impl FilenamePredicate for ExtensionPredicate {
    fn accept(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

#[derive(Debug)]
struct SourceEntry {
    slot: Slot,
    revision: u64,
    checksum: String,
    directory: usize,
}

impl SourceEntry {
    fn cache_key(&self) -> CacheKey {
        CacheKey {
            filter_id: self.slot.filter_id.clone(),
            revision: self.revision,
            checksum: self.checksum.clone(),
        }
    }
}

struct SourceFile {
    path: PathBuf,
    source: String,
    checksum: String,
}

#[derive(Default)]
struct Scan {
    files: Vec<SourceFile>,
    /// Present but unreadable; previous entries are kept.
    unreadable: Vec<PathBuf>,
}

/// Mirrors filter files on disk into the registry.
pub struct SourcePoller {
    directories: Vec<SourceDirectory>,
    predicate: Arc<dyn FilenamePredicate>,
    loader: Arc<FilterLoader>,
    registry: Arc<FilterRegistry>,
    watch: bool,
    applied: HashMap<PathBuf, SourceEntry>,
    /// Checksums that failed to compile, so unchanged bad files are not retried.
    rejected: HashMap<PathBuf, String>,
    /// Files skipped because another file provides their id; warned about once.
    conflicts: HashMap<PathBuf, FilterId>,
    next_revision: HashMap<PathBuf, u64>,
}

impl SourcePoller {
    pub fn new(directories: Vec<SourceDirectory>, loader: Arc<FilterLoader>, registry: Arc<FilterRegistry>) -> Self {
        Self {
            directories,
            predicate: Arc::new(ExtensionPredicate::default()),
            loader,
            registry,
            watch: false,
            applied: HashMap::new(),
            rejected: HashMap::new(),
            conflicts: HashMap::new(),
            next_revision: HashMap::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: impl FilenamePredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Also wake on file-system notifications, not only on the interval.
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    fn bump_revision(&mut self, path: &Path) -> u64 {
        let counter = self.next_revision.entry(path.to_path_buf()).or_insert(0);
        let revision = *counter;
        *counter += 1;
        revision
    }
}

async fn scan(dir: &SourceDirectory, predicate: &dyn FilenamePredicate) -> io::Result<Scan> {
    let mut entries = tokio::fs::read_dir(&dir.path).await?;
    let mut scan = Scan::default();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() || !predicate.accept(&path) {
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => scan.files.push(SourceFile {
                checksum: checksum(&source),
                path,
                source,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable filter file");
                scan.unreadable.push(path);
            }
        }
    }
    Ok(scan)
}

#[async_trait]
impl PollCycle for SourcePoller {
    fn name(&self) -> &'static str {
        "source"
    }

    async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut scanned = HashSet::new();
        let mut present = HashSet::new();
        let mut files = Vec::new();
        for (idx, dir) in self.directories.iter().enumerate() {
            match scan(dir, self.predicate.as_ref()).await {
                Ok(found) => {
                    scanned.insert(idx);
                    present.extend(found.unreadable);
                    for file in found.files {
                        present.insert(file.path.clone());
                        files.push((idx, file));
                    }
                }
                Err(e) => tracing::warn!(
                    path = %dir.path.display(),
                    error = %e,
                    "Filter directory unavailable, keeping its filters"
                ),
            }
        }
        if scanned.is_empty() && !self.directories.is_empty() {
            return Err(FilterError::StoreUnavailable(
                "no filter directory could be read".to_string(),
            ));
        }

        let mut report = CycleReport::default();
        let mut superseded: Vec<CacheKey> = Vec::new();

        let gone: Vec<PathBuf> = self
            .applied
            .iter()
            .filter(|(path, entry)| scanned.contains(&entry.directory) && !present.contains(*path))
            .map(|(path, _)| path.clone())
            .collect();
        let mut removed = Vec::new();
        for path in gone {
            if let Some(entry) = self.applied.remove(&path) {
                tracing::info!(path = %path.display(), filter_id = %entry.slot.filter_id, "Filter source removed");
                superseded.push(entry.cache_key());
                removed.push(entry.slot);
            }
        }
        self.rejected.retain(|path, _| present.contains(path));
        self.conflicts.retain(|path, _| present.contains(path));

        let mut owners: HashMap<FilterId, PathBuf> = self
            .applied
            .iter()
            .map(|(path, entry)| (entry.slot.filter_id.clone(), path.clone()))
            .collect();

        files.sort_by(|a, b| a.1.path.cmp(&b.1.path));
        let mut upserts = Vec::new();
        for (idx, file) in files {
            let filter_type = self.directories[idx].filter_type;
            let Some(name) = file.path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let filter_id = FilterId::derive(&name, filter_type);

            if let Some(owner) = owners.get(&filter_id).filter(|owner| **owner != file.path) {
                report.failed += 1;
                // Re-checked every cycle: the owner may go away.
                if self.conflicts.get(&file.path) != Some(&filter_id) {
                    tracing::warn!(
                        path = %file.path.display(),
                        owner = %owner.display(),
                        filter_id = %filter_id,
                        "Filter id already provided by another file, ignoring"
                    );
                    self.conflicts.insert(file.path.clone(), filter_id);
                }
                continue;
            }
            self.conflicts.remove(&file.path);
            if self
                .applied
                .get(&file.path)
                .is_some_and(|entry| entry.checksum == file.checksum)
            {
                report.unchanged += 1;
                continue;
            }
            if self.rejected.get(&file.path) == Some(&file.checksum) {
                report.failed += 1;
                continue;
            }

            let revision = self.bump_revision(&file.path);
            let request = CompileRequest {
                filter_id: filter_id.clone(),
                revision,
                filter_type,
                filter_name: name,
                order: None,
                disable_property: None,
                source_code: file.source,
            };
            match self.loader.load(request).await {
                Ok(compiled) => {
                    self.rejected.remove(&file.path);
                    owners.insert(filter_id.clone(), file.path.clone());
                    let slot = Slot::primary(filter_id).with_origin(Origin::Source);
                    let entry = SourceEntry {
                        slot: slot.clone(),
                        revision,
                        checksum: file.checksum,
                        directory: idx,
                    };
                    if let Some(previous) = self.applied.insert(file.path, entry) {
                        superseded.push(previous.cache_key());
                    }
                    upserts.push((slot, compiled));
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        path = %file.path.display(),
                        filter_id = %filter_id,
                        revision,
                        error = %e,
                        "Filter source failed to compile, keeping last-good entry"
                    );
                    self.rejected.insert(file.path, file.checksum);
                }
            }
        }

        // A slot re-provided this cycle (file moved between directories) stays.
        removed.retain(|slot| !upserts.iter().any(|(upserted, _)| upserted == slot));
        report.installed = upserts.len();
        report.removed = removed.len();

        self.registry.install(upserts, &removed);
        for key in &superseded {
            self.loader.evict_key(key);
        }
        Ok(report)
    }

    fn wake_source(&mut self) -> WakeSource {
        if !self.watch {
            return WakeSource::Never;
        }

        let (tx, rx) = mpsc::channel(1);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "Filter directory watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        );

        match watcher {
            Ok(mut watcher) => {
                for dir in &self.directories {
                    if let Err(e) = watcher.watch(&dir.path, RecursiveMode::NonRecursive) {
                        tracing::warn!(path = %dir.path.display(), error = %e, "Cannot watch filter directory, relying on polling");
                    }
                }
                tracing::info!(directories = self.directories.len(), "Filter directory watcher started");
                WakeSource::Watch { _watcher: watcher, rx }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Filter directory watcher unavailable, relying on polling");
                WakeSource::Never
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RequestContext;
    use crate::loader::{Declared, ExecutableFilter, FilterCompiler, FilterFailure};
    use std::fs;

    #[derive(Debug)]
    struct Ordered(i32);

    impl ExecutableFilter for Ordered {
        fn run(&self, _ctx: &mut RequestContext) -> std::result::Result<(), FilterFailure> {
            Ok(())
        }

        fn declared(&self) -> Declared {
            Declared {
                order: Some(self.0),
                disable_property: None,
            }
        }
    }

    /// Source is an order number; anything else fails to compile.
    struct OrderCompiler;

    impl FilterCompiler for OrderCompiler {
        fn compile(&self, source: &str) -> std::result::Result<Arc<dyn ExecutableFilter>, String> {
            source
                .trim()
                .parse::<i32>()
                .map(|order| Arc::new(Ordered(order)) as Arc<dyn ExecutableFilter>)
                .map_err(|e| e.to_string())
        }
    }

    fn poller(dirs: Vec<SourceDirectory>) -> (SourcePoller, Arc<FilterRegistry>, Arc<FilterLoader>) {
        let registry = Arc::new(FilterRegistry::new());
        let loader = Arc::new(FilterLoader::new(Arc::new(OrderCompiler)));
        (SourcePoller::new(dirs, loader.clone(), registry.clone()), registry, loader)
    }

    #[tokio::test]
    async fn test_add_change_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (mut poller, registry, _) = poller(vec![SourceDirectory::new(dir.path(), FilterType::Pre)]);

        fs::write(dir.path().join("checkAuth.filter"), "5").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.installed, 1);

        let snapshot = registry.current_snapshot();
        let pre = snapshot.filters(FilterType::Pre);
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].filter_id.as_str(), "checkAuth:pre");
        assert_eq!(pre[0].order, 5);
        assert_eq!(pre[0].disable_property, "checkAuth.pre.disable");
        assert_eq!(pre[0].revision, 0);

        assert_eq!(poller.run_cycle().await.unwrap().unchanged, 1);

        fs::write(dir.path().join("checkAuth.filter"), "7").unwrap();
        poller.run_cycle().await.unwrap();
        let snapshot = registry.current_snapshot();
        assert_eq!(snapshot.filters(FilterType::Pre)[0].revision, 1);
        assert_eq!(snapshot.filters(FilterType::Pre)[0].order, 7);

        fs::remove_file(dir.path().join("checkAuth.filter")).unwrap();
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(registry.current_snapshot().filters(FilterType::Pre).is_empty());
    }

    #[tokio::test]
    async fn test_bad_edit_keeps_previous_and_is_not_recompiled() {
        let dir = tempfile::tempdir().unwrap();
        let (mut poller, registry, loader) = poller(vec![SourceDirectory::new(dir.path(), FilterType::Post)]);
        let path = dir.path().join("stats.filter");

        fs::write(&path, "1").unwrap();
        poller.run_cycle().await.unwrap();
        fs::write(&path, "not a number").unwrap();

        assert_eq!(poller.run_cycle().await.unwrap().failed, 1);
        assert_eq!(poller.run_cycle().await.unwrap().failed, 1);
        assert_eq!(loader.compilations(), 2);

        let snapshot = registry.current_snapshot();
        assert_eq!(snapshot.filters(FilterType::Post).len(), 1);
        assert_eq!(snapshot.filters(FilterType::Post)[0].order, 1);
    }

    #[tokio::test]
    async fn test_missing_directory_keeps_entries() {
        let present = tempfile::tempdir().unwrap();
        let vanishing = tempfile::tempdir().unwrap();
        let (mut poller, registry, _) = poller(vec![
            SourceDirectory::new(present.path(), FilterType::Pre),
            SourceDirectory::new(vanishing.path(), FilterType::Route),
        ]);

        fs::write(present.path().join("a.filter"), "1").unwrap();
        fs::write(vanishing.path().join("r.filter"), "1").unwrap();
        assert_eq!(poller.run_cycle().await.unwrap().installed, 2);

        let gone = vanishing.path().to_path_buf();
        vanishing.close().unwrap();
        assert!(!gone.exists());

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(registry.current_snapshot().filters(FilterType::Route).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_takes_over_when_owner_removed() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let (mut poller, registry, _) = poller(vec![
            SourceDirectory::new(first.path(), FilterType::Pre),
            SourceDirectory::new(second.path(), FilterType::Pre),
        ]);
        let one = first.path().join("a.filter");
        let two = second.path().join("a.filter");
        fs::write(&one, "1").unwrap();
        fs::write(&two, "2").unwrap();

        let report = poller.run_cycle().await.unwrap();
        assert_eq!((report.installed, report.failed), (1, 1));
        assert_eq!(poller.run_cycle().await.unwrap().failed, 1);

        let winner = registry.current_snapshot().filters(FilterType::Pre)[0].order;
        let (owner, loser_order) = if winner == 1 { (&one, 2) } else { (&two, 1) };
        fs::remove_file(owner).unwrap();

        let report = poller.run_cycle().await.unwrap();
        assert_eq!((report.installed, report.removed, report.failed), (1, 0, 0));
        let snapshot = registry.current_snapshot();
        assert_eq!(snapshot.filters(FilterType::Pre).len(), 1);
        assert_eq!(snapshot.filters(FilterType::Pre)[0].order, loser_order);
    }

    #[tokio::test]
    async fn test_all_directories_missing_fails_cycle() {
        let (mut poller, _, _) = poller(vec![SourceDirectory::new("/nonexistent/filters", FilterType::Pre)]);
        assert!(matches!(
            poller.run_cycle().await,
            Err(FilterError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_extension_predicate() {
        let predicate = ExtensionPredicate::new(".Filter");
        assert!(predicate.accept(Path::new("/x/a.filter")));
        assert!(predicate.accept(Path::new("/x/a.FILTER")));
        assert!(!predicate.accept(Path::new("/x/a.filter.bak")));
        assert!(!predicate.accept(Path::new("/x/filter")));
    }
}
