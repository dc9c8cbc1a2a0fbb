use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use redshift_cot_mcp::{
    config::Config,
    mcp::stdio::serve_stdio,
    metrics::register_metrics,
    server::{build_mcp_server, Server},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Http,
    Stdio,
}

#[derive(Debug, Parser)]
#[command(name = "redshift-cot-mcp", version, about = "MCP server for Redshift diagnosis and remediation planning")]
struct Args {
    /// Transport to serve MCP on
    #[arg(long, value_enum, default_value = "http")]
    mode: Mode,

    /// Listen address for http mode (overrides SERVER_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries protocol messages in stdio mode, so logs always go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    info!(
        "Loaded configuration: knowledge s3://{}/{}, llm {} ({}), cluster {}",
        config.knowledge.bucket,
        config.knowledge.key,
        config.llm.provider,
        config.llm.model,
        config.monitor.cluster
    );

    register_metrics();
    let mcp = build_mcp_server(&config)
        .await
        .context("Failed to initialize MCP server")?;

    match args.mode {
        Mode::Http => {
            info!("Starting server on {}", config.server.addr);
            Server::new(mcp).start(&config.server.addr).await?;
        }
        Mode::Stdio => serve_stdio(&mcp).await?,
    }

    Ok(())
}
