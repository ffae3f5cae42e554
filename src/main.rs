//! mcp-router — one MCP tool in front of many MCP servers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use mcp_router::config::load_config;
use mcp_router::mcp_client::StdioLauncher;
use mcp_router::router::Engine;
use mcp_router::server::serve_stdio;

#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(version, about = "Multiplex MCP servers behind a single router tool")]
struct Cli {
    /// Path to the MCP servers configuration (JSON or YAML)
    #[arg(long, short = 'c')]
    config_file: PathBuf,

    /// Transport used to talk to the hosting client (only stdio is available)
    #[arg(long, short = 't', value_enum, default_value = "stdio")]
    transport: Transport,
}

/// Hosting transports. Newline-delimited JSON-RPC on stdin/stdout is the
/// only one; there is no HTTP server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// JSON-RPC over the process's stdin/stdout
    Stdio,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    mcp_router::init_tracing();

    let config = load_config(&cli.config_file)
        .with_context(|| format!("loading {}", cli.config_file.display()))?;
    tracing::info!(
        path = %cli.config_file.display(),
        servers = config.mcp_servers.len(),
        "configuration loaded"
    );

    let engine = Arc::new(Engine::start(&config, &StdioLauncher).await);
    for failure in engine.startup_failures() {
        eprintln!("mcp-router: {failure}");
    }
    eprintln!("mcp-router: loaded servers:\n{}", engine.summary());

    let served = match cli.transport {
        Transport::Stdio => {
            tokio::select! {
                served = serve_stdio(Arc::clone(&engine)) => served.context("stdio transport failed"),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    Ok(())
                }
            }
        }
    };

    engine.shutdown().await;
    served
}
