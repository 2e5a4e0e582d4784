// Configuration for depspider.
// Process-wide knobs come from environment variables; per-workspace settings
// arrive with the worker's init message.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-request timeout on the host (DEPSPIDER_REQUEST_TIMEOUT_MS)
    pub request_timeout_ms: u64,

    /// Upper bound for init -> ready (DEPSPIDER_WARMUP_TIMEOUT_MS)
    pub warmup_timeout_ms: u64,

    /// File-change debounce window (DEPSPIDER_DEBOUNCE_MS)
    pub debounce_ms: u64,

    /// Default crawl depth (DEPSPIDER_MAX_DEPTH)
    pub max_depth: usize,

    /// Warmup progress cadence in files (DEPSPIDER_PROGRESS_EVERY)
    pub progress_every: usize,

    /// Default log filter (DEPSPIDER_LOG)
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            warmup_timeout_ms: 300_000,
            debounce_ms: 300,
            max_depth: 10,
            progress_every: 50,
            log: "warn".to_string(),
        }
    }
}

fn env_override<T: FromStr + std::fmt::Display>(key: &str, slot: &mut T) {
    let Ok(val) = env::var(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => eprintln!("depspider: Warning: Invalid {key} value: {val}, using default: {slot}"),
    }
}

impl Config {
    fn from_env() -> Self {
        let mut config = Config::default();
        env_override("DEPSPIDER_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms);
        env_override("DEPSPIDER_WARMUP_TIMEOUT_MS", &mut config.warmup_timeout_ms);
        env_override("DEPSPIDER_DEBOUNCE_MS", &mut config.debounce_ms);
        env_override("DEPSPIDER_MAX_DEPTH", &mut config.max_depth);
        env_override("DEPSPIDER_PROGRESS_EVERY", &mut config.progress_every);
        if let Ok(val) = env::var("DEPSPIDER_LOG") {
            if !val.trim().is_empty() {
                config.log = val.trim().to_string();
            }
        }
        if config.progress_every == 0 {
            config.progress_every = 1;
        }
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }
}

/// Workspace settings carried by `init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SpiderConfig {
    pub workspace_root: PathBuf,
    pub max_depth: usize,
    /// Import prefix -> directory, relative to the workspace root unless absolute.
    pub aliases: BTreeMap<String, String>,
    pub exclude_patterns: Vec<String>,
    pub respect_gitignore: bool,
    pub enable_warmup: bool,
    pub enable_file_watcher: bool,
    pub debounce_ms: u64,
    /// 0 means unlimited.
    pub max_files: usize,
    pub tsconfig_paths: bool,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        let config = Config::get();
        Self {
            workspace_root: PathBuf::new(),
            max_depth: config.max_depth,
            aliases: BTreeMap::new(),
            exclude_patterns: Vec::new(),
            respect_gitignore: true,
            enable_warmup: true,
            enable_file_watcher: true,
            debounce_ms: config.debounce_ms,
            max_files: 0,
            tsconfig_paths: true,
        }
    }
}

impl SpiderConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    /// Checks the root and canonicalizes it in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            bail!("workspaceRoot is required");
        }
        if !self.workspace_root.is_dir() {
            bail!(
                "workspaceRoot {} is not a directory",
                self.workspace_root.display()
            );
        }
        self.workspace_root = self
            .workspace_root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", self.workspace_root.display()))?;
        if self.max_depth > 50 {
            bail!("maxDepth must be within 0..=50, got {}", self.max_depth);
        }
        Ok(())
    }
}
