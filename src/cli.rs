use crate::config::SpiderConfig;
use crate::worker::{HostOptions, TransportKind};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "depspider",
    version,
    about = "Dependency graphs, call graphs and change impact for TS/JS, Python and Rust",
    after_help = r#"Examples:
  depspider index --root .
  depspider crawl --root . src/main.ts --depth 3
  depspider request --root . --method get_impact_analysis --params '{"filePath":"src/api.ts","symbolName":"fetchUser"}'
  depspider serve --root . --alias @/=src
  depspider mcp-serve --root . --process-worker
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Workspace settings shared by every command that starts a spider.
#[derive(clap::Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace root; every analyzed path must stay inside it.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Default crawl depth (0..=50).
    #[arg(long)]
    pub max_depth: Option<usize>,
    /// Import alias as PREFIX=DIR, e.g. `@/=src`. Repeatable.
    #[arg(long = "alias", value_name = "PREFIX=DIR")]
    pub aliases: Vec<String>,
    /// Gitignore-style pattern to leave out of indexing. Repeatable.
    #[arg(long = "exclude", value_name = "GLOB")]
    pub excludes: Vec<String>,
    /// Include files ignored by .gitignore.
    #[arg(long)]
    pub no_ignore: bool,
    /// Skip indexing the workspace at startup.
    #[arg(long)]
    pub no_warmup: bool,
    /// Do not watch the workspace for changes.
    #[arg(long)]
    pub no_watch: bool,
    /// Debounce window for filesystem events in milliseconds.
    #[arg(long)]
    pub debounce_ms: Option<u64>,
    /// Stop enumerating after this many files (0 = unlimited).
    #[arg(long)]
    pub max_files: Option<usize>,
    /// Ignore tsconfig/jsconfig `compilerOptions.paths`.
    #[arg(long)]
    pub no_tsconfig: bool,
}

impl WorkspaceArgs {
    pub fn into_config(self) -> Result<SpiderConfig> {
        let mut config = SpiderConfig::new(self.root);
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        for raw in self.aliases {
            let Some((prefix, dir)) = raw.split_once('=') else {
                bail!("alias {raw:?} must look like PREFIX=DIR");
            };
            if prefix.is_empty() || dir.is_empty() {
                bail!("alias {raw:?} has an empty prefix or directory");
            }
            config.aliases.insert(prefix.to_string(), dir.to_string());
        }
        config.exclude_patterns = self.excludes;
        config.respect_gitignore = !self.no_ignore;
        config.enable_warmup = !self.no_warmup;
        config.enable_file_watcher = !self.no_watch;
        if let Some(debounce) = self.debounce_ms {
            config.debounce_ms = debounce;
        }
        if let Some(max_files) = self.max_files {
            config.max_files = max_files;
        }
        config.tsconfig_paths = !self.no_tsconfig;
        Ok(config)
    }
}

/// How the server hosts its worker.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct HostArgs {
    /// Run the worker as a child process instead of a thread.
    #[arg(long)]
    pub process_worker: bool,
    /// Per-request timeout in milliseconds.
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

impl HostArgs {
    pub fn into_options(self) -> Result<HostOptions> {
        let mut options = HostOptions::default();
        if self.process_worker {
            let program = std::env::current_exe().context("locate depspider executable")?;
            options.transport = TransportKind::Process { program };
        }
        if let Some(ms) = self.request_timeout_ms {
            options.request_timeout = std::time::Duration::from_millis(ms);
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Run MCP server over stdio.
    McpServe {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Run a single request and exit.
    Request {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Print the dependency graph reachable from one file.
    Crawl {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Entry file, relative to the root or absolute.
        entry: String,
        /// Hops from the entry file; defaults to --max-depth.
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Index the workspace once and print the summary.
    Index {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
    /// Worker process speaking the host protocol as JSON lines on stdio.
    #[command(hide = true)]
    Worker,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_args_map_onto_spider_config() {
        let args = Args::parse_from([
            "depspider",
            "serve",
            "--root",
            "/w",
            "--alias",
            "@/=src",
            "--exclude",
            "dist/**",
            "--no-watch",
            "--debounce-ms",
            "50",
        ]);
        let Command::Serve { workspace, host } = args.command else {
            panic!("expected serve");
        };
        assert!(!host.process_worker);
        let config = workspace.into_config().unwrap();
        assert_eq!(config.workspace_root, PathBuf::from("/w"));
        assert_eq!(config.aliases.get("@/").map(String::as_str), Some("src"));
        assert_eq!(config.exclude_patterns, vec!["dist/**".to_string()]);
        assert!(!config.enable_file_watcher);
        assert!(config.enable_warmup);
        assert_eq!(config.debounce_ms, 50);
    }

    #[test]
    fn malformed_alias_is_rejected() {
        let args = Args::parse_from(["depspider", "index", "--alias", "nodir"]);
        let Command::Index { workspace } = args.command else {
            panic!("expected index");
        };
        assert!(workspace.into_config().is_err());
    }
}
