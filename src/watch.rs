//! File-change scheduling: raw watcher events in, debounced per-path
//! invalidations out.

use anyhow::{Context, Result};
use ignore::{
    Match as IgnoreMatch,
    gitignore::{Gitignore, GitignoreBuilder},
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::scan::{self, ExcludeFilter};
use crate::spider::Spider;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Change,
    Add,
    Unlink,
}

impl FileEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileEventKind::Change => "change",
            FileEventKind::Add => "add",
            FileEventKind::Unlink => "unlink",
        }
    }

    /// Kind to keep when `next` arrives while `self` is still pending.
    fn merge(self, next: FileEventKind) -> FileEventKind {
        match (self, next) {
            (FileEventKind::Add, FileEventKind::Change) => FileEventKind::Add,
            (FileEventKind::Unlink, FileEventKind::Add) => FileEventKind::Change,
            (_, next) => next,
        }
    }
}

/// Receiver of debounced invalidations.
pub trait InvalidationSink {
    fn apply(&mut self, path: &Path, kind: FileEventKind);
}

impl InvalidationSink for Spider {
    fn apply(&mut self, path: &Path, kind: FileEventKind) {
        match kind {
            FileEventKind::Change => {
                self.handle_file_changed(path);
            }
            FileEventKind::Add => {
                self.handle_file_added(path);
            }
            FileEventKind::Unlink => {
                self.handle_file_deleted(path);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingChange {
    path: PathBuf,
    kind: FileEventKind,
    due: Instant,
}

/// Pending invalidations keyed by normalized path. Scheduling a path that is
/// already pending replaces its task and pushes the deadline out, so a burst
/// of events on one file collapses into a single invalidation while other
/// files keep their own timers.
#[derive(Debug)]
pub struct ChangeScheduler {
    debounce: Duration,
    pending: HashMap<String, PendingChange>,
}

impl ChangeScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, path: &Path, kind: FileEventKind, now: Instant) {
        let key = util::path_key(path);
        let due = now + self.debounce;
        let kind = match self.pending.get(&key) {
            Some(previous) => previous.kind.merge(kind),
            None => kind,
        };
        self.pending.insert(
            key.clone(),
            PendingChange {
                path: PathBuf::from(key),
                kind,
                due,
            },
        );
    }

    pub fn cancel(&mut self, path: &Path) -> bool {
        self.pending.remove(&util::path_key(path)).is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|change| change.due).min()
    }

    /// Removes and returns every change due at `now`, oldest deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, FileEventKind)> {
        let due_keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, change)| change.due <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut due: Vec<PendingChange> = due_keys
            .iter()
            .filter_map(|key| self.pending.remove(key))
            .collect();
        due.sort_by(|a, b| a.due.cmp(&b.due).then(a.path.cmp(&b.path)));
        due.into_iter().map(|change| (change.path, change.kind)).collect()
    }

    pub fn flush_due(&mut self, now: Instant, sink: &mut dyn InvalidationSink) -> usize {
        let due = self.take_due(now);
        for (path, kind) in &due {
            debug!(path = %path.display(), event = kind.as_str(), "invalidating");
            sink.apply(path, *kind);
        }
        due.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Maps a notify event onto the change/add/unlink vocabulary. Access and
/// metadata-only events produce nothing.
pub fn classify(event: &Event) -> Vec<(PathBuf, FileEventKind)> {
    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Add,
        EventKind::Remove(_) => FileEventKind::Unlink,
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEventKind::Unlink,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::Add,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), FileEventKind::Unlink));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), FileEventKind::Add));
            }
            return out;
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            return event
                .paths
                .iter()
                .map(|path| {
                    let kind = if path.exists() {
                        FileEventKind::Add
                    } else {
                        FileEventKind::Unlink
                    };
                    (path.clone(), kind)
                })
                .collect();
        }
        EventKind::Modify(_) => FileEventKind::Change,
        EventKind::Any | EventKind::Other => FileEventKind::Change,
    };
    event.paths.iter().map(|path| (path.clone(), kind)).collect()
}

/// Ignore rules applied to watcher events: configured excludes, then the
/// workspace ignore files. The walker honours the same files during a scan,
/// but watcher events arrive one path at a time and have to be judged here.
pub struct PathFilter {
    root: PathBuf,
    respect_gitignore: bool,
    excludes: ExcludeFilter,
    /// The user's global excludes file, then `.git/info/exclude`.
    repo_rules: Vec<Gitignore>,
    /// `.gitignore` and `.ignore` of one directory, merged; built on first use.
    dir_rules: HashMap<PathBuf, Gitignore>,
}

impl PathFilter {
    pub fn new(root: &Path, respect_gitignore: bool, excludes: ExcludeFilter) -> Self {
        let repo_rules = if respect_gitignore {
            repo_level_rules(root)
        } else {
            Vec::new()
        };
        Self {
            root: root.to_path_buf(),
            respect_gitignore,
            excludes,
            repo_rules,
            dir_rules: HashMap::new(),
        }
    }

    /// Directories pass through (a removed directory must still evict the
    /// files under it); files must be analyzable.
    pub fn is_ignored(&mut self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        let is_dir = path.is_dir();
        if !is_dir && path.extension().is_some() && !scan::is_analyzable(path) {
            return true;
        }
        if self.excludes.is_excluded(path, is_dir) {
            return true;
        }
        if !self.respect_gitignore {
            return false;
        }

        let mut ignored = None;
        for rules in &self.repo_rules {
            if let Some(decision) = verdict(rules.matched_path_or_any_parents(path, is_dir)) {
                ignored = Some(decision);
            }
        }
        // Root first so that rules closer to the file get the last word.
        let mut dir = self.root.clone();
        let parents = relative.parent().map(|p| p.components().count()).unwrap_or(0);
        let mut components = relative.components();
        for depth in 0..=parents {
            if depth > 0 {
                match components.next() {
                    Some(component) => dir.push(component),
                    None => break,
                }
            }
            let rules = self
                .dir_rules
                .entry(dir.clone())
                .or_insert_with_key(|dir| directory_rules(dir));
            if let Some(decision) = verdict(rules.matched_path_or_any_parents(path, is_dir)) {
                ignored = Some(decision);
            }
        }
        ignored.unwrap_or(false)
    }
}

fn verdict<T>(matched: IgnoreMatch<T>) -> Option<bool> {
    match matched {
        IgnoreMatch::Ignore(_) => Some(true),
        IgnoreMatch::Whitelist(_) => Some(false),
        IgnoreMatch::None => None,
    }
}

fn directory_rules(dir: &Path) -> Gitignore {
    let files = [dir.join(".gitignore"), dir.join(".ignore")];
    build_rules(dir, files.iter().filter(|file| file.is_file()))
}

fn repo_level_rules(root: &Path) -> Vec<Gitignore> {
    let (global, err) = GitignoreBuilder::new(root).build_global();
    if let Some(err) = err {
        warn!("watch: global excludes file: {err}");
    }
    let exclude = root.join(".git").join("info").join("exclude");
    let local = build_rules(root, std::iter::once(&exclude).filter(|file| file.is_file()));
    [global, local]
        .into_iter()
        .filter(|rules| !rules.is_empty())
        .collect()
}

fn build_rules<'a>(base: &Path, files: impl Iterator<Item = &'a PathBuf>) -> Gitignore {
    let mut builder = GitignoreBuilder::new(base);
    let mut any = false;
    for file in files {
        any = true;
        if let Some(err) = builder.add(file) {
            warn!(file = %file.display(), "watch: bad ignore rule: {err}");
        }
    }
    if !any {
        return Gitignore::empty();
    }
    builder.build().unwrap_or_else(|err| {
        warn!(base = %base.display(), "watch: ignore rules dropped: {err}");
        Gitignore::empty()
    })
}

/// Keeps the OS watcher alive; dropping it stops event delivery.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Watches `root` recursively and hands every filtered change to
/// `on_change` from notify's thread.
pub fn start<F>(root: &Path, mut filter: PathFilter, mut on_change: F) -> Result<WatchHandle>
where
    F: FnMut(PathBuf, FileEventKind) + Send + 'static,
{
    let handler = move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for (path, kind) in classify(&event) {
                if filter.is_ignored(&path) {
                    continue;
                }
                on_change(path, kind);
            }
        }
        Err(err) => warn!("watch error: {err}"),
    };
    let mut watcher =
        notify::recommended_watcher(handler).context("create file watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watch {}", root.display()))?;
    debug!(root = %root.display(), "file watcher started");
    Ok(WatchHandle { _watcher: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(PathBuf, FileEventKind)>,
    }

    impl InvalidationSink for Recorder {
        fn apply(&mut self, path: &Path, kind: FileEventKind) {
            self.calls.push((path.to_path_buf(), kind));
        }
    }

    #[test]
    fn two_changes_inside_window_invalidate_once() {
        let mut scheduler = ChangeScheduler::new(Duration::from_millis(300));
        let mut sink = Recorder::default();
        let start = Instant::now();
        let path = Path::new("/w/src/a.ts");

        scheduler.schedule(path, FileEventKind::Change, start);
        scheduler.schedule(path, FileEventKind::Change, start + Duration::from_millis(100));
        assert_eq!(scheduler.len(), 1);

        // first deadline has passed but the reschedule pushed it out
        assert_eq!(
            scheduler.flush_due(start + Duration::from_millis(350), &mut sink),
            0
        );
        assert_eq!(
            scheduler.flush_due(start + Duration::from_millis(400), &mut sink),
            1
        );
        assert_eq!(sink.calls.len(), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn different_files_debounce_independently() {
        let mut scheduler = ChangeScheduler::new(Duration::from_millis(300));
        let mut sink = Recorder::default();
        let start = Instant::now();
        scheduler.schedule(Path::new("/w/a.ts"), FileEventKind::Change, start);
        scheduler.schedule(
            Path::new("/w/b.ts"),
            FileEventKind::Change,
            start + Duration::from_millis(200),
        );
        assert_eq!(scheduler.next_deadline(), Some(start + Duration::from_millis(300)));
        scheduler.flush_due(start + Duration::from_millis(300), &mut sink);
        assert_eq!(sink.calls, vec![(PathBuf::from("/w/a.ts"), FileEventKind::Change)]);
        scheduler.flush_due(start + Duration::from_millis(500), &mut sink);
        assert_eq!(sink.calls.len(), 2);
    }

    #[test]
    fn pending_kinds_merge() {
        assert_eq!(
            FileEventKind::Add.merge(FileEventKind::Change),
            FileEventKind::Add
        );
        assert_eq!(
            FileEventKind::Change.merge(FileEventKind::Unlink),
            FileEventKind::Unlink
        );
        assert_eq!(
            FileEventKind::Unlink.merge(FileEventKind::Add),
            FileEventKind::Change
        );
    }

    #[test]
    fn cancel_drops_pending_task() {
        let mut scheduler = ChangeScheduler::new(Duration::from_millis(10));
        let now = Instant::now();
        scheduler.schedule(Path::new("/w/a.ts"), FileEventKind::Change, now);
        assert!(scheduler.cancel(Path::new("/w/a.ts")));
        assert!(scheduler.take_due(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn classify_maps_notify_kinds() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a.ts".into());
        assert_eq!(classify(&create), vec![("/w/a.ts".into(), FileEventKind::Add)]);
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/w/a.ts".into());
        assert_eq!(classify(&modify)[0].1, FileEventKind::Change);
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/a.ts".into());
        assert_eq!(classify(&remove)[0].1, FileEventKind::Unlink);
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/w/a.ts".into());
        assert!(classify(&access).is_empty());
    }

    #[test]
    fn filter_skips_excluded_and_foreign_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        let excludes = ExcludeFilter::new(&root, &["**/*.spec.ts".to_string()]).unwrap();
        let mut filter = PathFilter::new(&root, true, excludes);
        assert!(!filter.is_ignored(&root.join("src/a.ts")));
        assert!(filter.is_ignored(&root.join("src/a.spec.ts")));
        assert!(filter.is_ignored(&root.join("generated/x.ts")));
        assert!(filter.is_ignored(&root.join("node_modules/p/index.js")));
        assert!(filter.is_ignored(&root.join("README.md")));
        assert!(filter.is_ignored(Path::new("/elsewhere/a.ts")));
    }

    #[test]
    fn nested_ignore_files_override_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join(".gitignore"), "*.gen.ts\n").unwrap();
        std::fs::write(root.join("src/.ignore"), "!keep.gen.ts\n").unwrap();
        let excludes = ExcludeFilter::new(&root, &[]).unwrap();
        let mut filter = PathFilter::new(&root, true, excludes);
        assert!(filter.is_ignored(&root.join("src/other.gen.ts")));
        assert!(!filter.is_ignored(&root.join("src/keep.gen.ts")));

        let excludes = ExcludeFilter::new(&root, &[]).unwrap();
        let mut unfiltered = PathFilter::new(&root, false, excludes);
        assert!(!unfiltered.is_ignored(&root.join("src/other.gen.ts")));
    }
}
