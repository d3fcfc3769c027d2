//! Toolgate CLI entry point.
//!
//! Provides `serve`, which answers JSON-Lines requests on stdin/stdout, and
//! `check`, which prints the resolved configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;

use toolgate::adapters::stdio;
use toolgate::agent::ToolEngine;
use toolgate::config::Config;
use toolgate::tools::echo::{EchoTool, ECHO_TOOL_NAME};
use toolgate::tools::{ToolOptions, ToolRegistry};

/// Toolgate: authorization, confirmation and audit for agent tool calls.
#[derive(Parser)]
#[command(name = "toolgate", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Answer JSON-Lines requests on stdin until EOF.
    Serve {
        /// Config file (defaults to `$TOOLGATE_CONFIG_PATH` or `./toolgate.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the resolved configuration and exit.
    Check {
        /// Config file (defaults to `$TOOLGATE_CONFIG_PATH` or `./toolgate.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => handle_serve(config).await,
        Command::Check { config } => handle_check(config),
    }
}

/// Load config from an explicit path or the usual resolution, then apply
/// env overrides.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Config::load().context("failed to load configuration"),
    }
}

/// Register built-in tools, applying any `[[tools]]` policy for them.
fn build_registry(config: &Config) -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    let echo_options = config.tool_options(ECHO_TOOL_NAME).unwrap_or_else(|| {
        ToolOptions::default().describe("Return the value argument unchanged")
    });
    registry.register(ECHO_TOOL_NAME, Arc::new(EchoTool), echo_options);
    Arc::new(registry)
}

/// Run the stdio request loop.
async fn handle_serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let _logging_guard =
        toolgate::logging::init_production(&config.paths.logs_dir(), &config.logging.log_level)?;

    let registry = build_registry(&config);
    let engine = Arc::new(
        ToolEngine::from_config(&config, registry).context("failed to create tool engine")?,
    );

    let sweeper = config
        .engine
        .sweep_interval()
        .map(|interval| engine.spawn_sweeper(interval));

    info!(
        tools = engine.registry().count(),
        ttl_secs = config.engine.confirmation_ttl_secs,
        "toolgate serving on stdio"
    );

    let answered = tokio::select! {
        result = stdio::serve(
            &engine,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        ) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            0
        }
    };

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!(answered, "toolgate stopped");
    Ok(())
}

/// Print the resolved configuration.
fn handle_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    toolgate::logging::init_cli(&config.logging.log_level);

    println!("owner_id = {}", config.engine.owner_id);
    println!(
        "confirmation_ttl_secs = {}",
        config.engine.confirmation_ttl_secs
    );
    println!(
        "result_retention_secs = {}",
        config.engine.result_retention_secs
    );
    println!("sweep_interval_secs = {}", config.engine.sweep_interval_secs);
    println!("actions_dir = {}", config.paths.actions_dir);
    println!("logs_dir = {}", config.paths.logs_dir);
    println!("log_level = {}", config.logging.log_level);
    for tool in &config.tools {
        println!(
            "tool {} owner={} private={} confirm={} risk={}",
            tool.name,
            tool.options.requires_owner,
            tool.options.requires_private,
            tool.options.requires_confirmation,
            tool.options.risk_level
        );
    }
    Ok(())
}
