use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::Spider;
use crate::config::Config;
use crate::model::{BuildSummary, IndexState, IndexStatus};
use crate::scan::{self, ScanOptions};
use crate::util;

/// One full-workspace indexing pass, advanced a file at a time by
/// [`Spider::index_step`] so the caller can service other work in between.
pub struct IndexPass {
    files: Vec<PathBuf>,
    next: usize,
    started: Instant,
    indexed: usize,
    skipped: usize,
    failed: usize,
    progress_every: usize,
    cancel: AtomicBool,
}

impl IndexPass {
    fn new(files: Vec<PathBuf>, progress_every: usize) -> Self {
        Self {
            files,
            next: 0,
            started: Instant::now(),
            indexed: 0,
            skipped: 0,
            failed: 0,
            progress_every: progress_every.max(1),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn processed(&self) -> usize {
        self.next
    }

    /// Takes effect before the next file; files already cached stay cached.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStep {
    /// One file handled; `report` is set on the progress cadence.
    Progress { report: Option<IndexStatus> },
    Done(BuildSummary),
}

enum FileOutcome {
    Indexed,
    Unchanged,
    Recovered,
}

impl Spider {
    /// Enumerates the workspace and starts a pass. Status moves through
    /// `counting` to `indexing`; a scan failure leaves it in `error`.
    pub fn begin_index(&mut self) -> Result<IndexPass> {
        self.status.begin();
        let options = ScanOptions {
            respect_gitignore: self.config.respect_gitignore,
            exclude_patterns: self.config.exclude_patterns.clone(),
            max_files: self.config.max_files,
        };
        let files = match scan::scan_workspace(&self.root, &options) {
            Ok(files) => files,
            Err(err) => {
                self.status.fail(format!("{err:#}"));
                return Err(err);
            }
        };
        self.status.total = files.len();
        self.status.state = IndexState::Indexing;
        info!(files = files.len(), root = %self.root.display(), "indexing workspace");
        Ok(IndexPass::new(files, Config::get().progress_every))
    }

    /// Handles the next file of `pass`. Cancellation is only observed here,
    /// between files.
    pub fn index_step(&mut self, pass: &mut IndexPass) -> IndexStep {
        if pass.is_cancelled() {
            return IndexStep::Done(self.finish_index(pass, true));
        }
        let Some(file) = pass.files.get(pass.next).cloned() else {
            return IndexStep::Done(self.finish_index(pass, false));
        };
        pass.next += 1;
        self.status.current_file = Some(util::path_key(&file));

        match self.index_file(&file) {
            Ok(FileOutcome::Indexed) => pass.indexed += 1,
            Ok(FileOutcome::Unchanged) => {
                pass.skipped += 1;
                self.status.skipped += 1;
            }
            Ok(FileOutcome::Recovered) => pass.failed += 1,
            Err(err) => {
                warn!(path = %file.display(), "skipping file: {err:#}");
                pass.failed += 1;
            }
        }
        self.status.processed = pass.next;

        let report = pass.next % pass.progress_every == 0 || pass.next == pass.files.len();
        IndexStep::Progress {
            report: report.then(|| self.status.clone()),
        }
    }

    fn index_file(&mut self, path: &Path) -> Result<FileOutcome> {
        let key = util::path_key(path);
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let hash = util::hash_bytes(&bytes);
        if self
            .cache
            .get(&key)
            .is_some_and(|cached| cached.hash == hash)
        {
            return Ok(FileOutcome::Unchanged);
        }
        let content = String::from_utf8_lossy(&bytes);
        match self.build_node(&key, &content) {
            Ok(node) => {
                self.store(key, hash, node);
                Ok(FileOutcome::Indexed)
            }
            Err(err) => {
                warn!(path = %key, "indexing without dependencies: {err}");
                // the old entry describes content that no longer exists
                self.invalidate_key(&key);
                Ok(FileOutcome::Recovered)
            }
        }
    }

    fn finish_index(&mut self, pass: &IndexPass, cancelled: bool) -> BuildSummary {
        if cancelled {
            self.status.state = IndexState::Idle;
        } else {
            self.status.state = IndexState::Validating;
            let swept = self.sweep_missing();
            if swept > 0 {
                debug!(swept, "dropped cache entries for vanished files");
            }
            self.status.state = IndexState::Complete;
        }
        self.status.current_file = None;
        let summary = BuildSummary {
            duration_ms: pass.started.elapsed().as_millis() as u64,
            indexed_files: pass.indexed,
            skipped_files: pass.skipped,
            failed_files: pass.failed,
            cancelled,
        };
        info!(
            indexed = summary.indexed_files,
            skipped = summary.skipped_files,
            failed = summary.failed_files,
            cancelled,
            duration_ms = summary.duration_ms,
            "index pass finished"
        );
        summary
    }

    fn sweep_missing(&mut self) -> usize {
        let missing: Vec<String> = self
            .cache
            .paths()
            .into_iter()
            .filter(|path| !Path::new(path).is_file())
            .collect();
        for path in &missing {
            self.invalidate_key(path);
        }
        missing.len()
    }

    /// Runs a whole pass without interleaving.
    pub fn build_full_index(
        &mut self,
        mut on_progress: impl FnMut(&IndexStatus),
    ) -> Result<BuildSummary> {
        let mut pass = self.begin_index()?;
        loop {
            match self.index_step(&mut pass) {
                IndexStep::Progress { report: Some(status) } => on_progress(&status),
                IndexStep::Progress { report: None } => {}
                IndexStep::Done(summary) => return Ok(summary),
            }
        }
    }

    /// Records a completed pass as the warmup. Each finished rebuild
    /// replaces it; cancelled passes leave it untouched.
    pub fn record_warmup(&mut self, summary: &BuildSummary) {
        if summary.cancelled {
            return;
        }
        self.warmup.completed = true;
        self.warmup.duration_ms = Some(summary.duration_ms);
        self.warmup.files_indexed = Some(summary.indexed_files + summary.skipped_files);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn full_index_populates_reverse_index_and_reports_progress() {
        let dir = workspace(&[
            ("src/a.ts", "import { b } from './b';\n"),
            ("src/b.ts", "import { c } from './c';\nexport const b = 1;\n"),
            ("src/c.ts", "export const c = 1;\n"),
            ("node_modules/x/index.js", "module.exports = 1;\n"),
        ]);
        let mut spider = spider(&dir);
        let mut reports = Vec::new();
        let summary = spider
            .build_full_index(|status| reports.push(status.processed))
            .unwrap();

        assert_eq!(summary.indexed_files, 3);
        assert!(!summary.cancelled);
        assert_eq!(reports.last(), Some(&3));
        assert_eq!(spider.status().state, IndexState::Complete);
        let refs = spider.find_referencing_files(&dir.path().join("src/c.ts"));
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn rebuild_skips_unchanged_files() {
        let dir = workspace(&[("a.ts", "export const a = 1;\n"), ("b.ts", "export const b = 1;\n")]);
        let mut spider = spider(&dir);
        spider.build_full_index(|_| {}).unwrap();
        fs::write(dir.path().join("b.ts"), "export const b = 2;\n").unwrap();

        let summary = spider.build_full_index(|_| {}).unwrap();
        assert_eq!(summary.skipped_files, 1);
        assert_eq!(summary.indexed_files, 1);
        assert_eq!(spider.status().skipped, 1);
    }

    #[test]
    fn cancellation_keeps_already_cached_entries() {
        let dir = workspace(&[
            ("a.ts", "export const a = 1;\n"),
            ("b.ts", "export const b = 1;\n"),
            ("c.ts", "export const c = 1;\n"),
        ]);
        let mut spider = spider(&dir);
        let mut pass = spider.begin_index().unwrap();
        assert!(matches!(spider.index_step(&mut pass), IndexStep::Progress { .. }));
        pass.cancel();
        match spider.index_step(&mut pass) {
            IndexStep::Done(summary) => {
                assert!(summary.cancelled);
                assert_eq!(summary.indexed_files, 1);
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert_eq!(spider.cache().len(), 1);
        assert_eq!(spider.status().state, IndexState::Idle);
    }

    #[test]
    fn rebuild_refreshes_warmup() {
        let dir = workspace(&[("a.ts", "export const a = 1;\n")]);
        let mut spider = spider(&dir);
        let summary = spider.build_full_index(|_| {}).unwrap();
        spider.record_warmup(&summary);
        assert!(spider.warmup().completed);
        assert_eq!(spider.warmup().files_indexed, Some(1));

        fs::write(dir.path().join("b.ts"), "export const b = 1;\n").unwrap();
        let rebuilt = spider.build_full_index(|_| {}).unwrap();
        spider.record_warmup(&rebuilt);
        assert_eq!(spider.warmup().files_indexed, Some(2));
        assert_eq!(spider.warmup().duration_ms, Some(rebuilt.duration_ms));

        let cancelled = BuildSummary {
            indexed_files: 7,
            cancelled: true,
            ..rebuilt
        };
        spider.record_warmup(&cancelled);
        assert_eq!(spider.warmup().files_indexed, Some(2));
    }
}
