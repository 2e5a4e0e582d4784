use anyhow::{Context, Result};
use clap::Parser;
use depspider::config::Config;
use depspider::spider::Spider;
use depspider::{cli, logging, mcp, rpc, worker};
use tracing::info;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    logging::init(&Config::get().log);

    match args.command {
        cli::Command::Serve { workspace, host } => {
            rpc::serve(workspace.into_config()?, host.into_options()?)
        }
        cli::Command::McpServe { workspace, host } => {
            mcp::serve(workspace.into_config()?, host.into_options()?)
        }
        cli::Command::Request {
            workspace,
            method,
            params,
            params_file,
            id,
        } => {
            let mut config = workspace.into_config()?;
            config.enable_file_watcher = false;
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?
            } else {
                params
            };
            let response = rpc::call(
                config,
                worker::HostOptions::default(),
                method,
                &params_raw,
                &id,
            )?;
            println!("{response}");
            Ok(())
        }
        cli::Command::Crawl {
            workspace,
            entry,
            depth,
        } => {
            let config = workspace.into_config()?;
            let depth = depth.unwrap_or(config.max_depth);
            let mut spider = Spider::with_default_parsers(config)?;
            let entry = spider.resolve_path(&entry)?;
            let result = spider.crawl(&entry, depth)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Index { workspace } => {
            let mut spider = Spider::with_default_parsers(workspace.into_config()?)?;
            let summary = spider.build_full_index(|status| {
                info!(
                    processed = status.processed,
                    total = status.total,
                    "indexing"
                );
            })?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        cli::Command::Worker => worker::run_stdio(),
    }
}
