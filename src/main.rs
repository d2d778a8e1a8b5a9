//! pg-gateway - A read-only PostgreSQL gateway for tool-calling agents
//!
//! Reads one JSON request per line on stdin and writes one JSON envelope
//! per line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use pg_gateway::config::{self, ConnectionConfig, Settings};
use pg_gateway::db::PgConnector;
use pg_gateway::dispatch;
use pg_gateway::gateway::Gateway;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pg-gateway", version, about)]
struct Cli {
    /// Settings file (defaults to ~/.pg-gateway/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pg_gateway=trace`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Skip the startup connectivity probe
    #[arg(long)]
    skip_probe: bool,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let settings = match &cli.config {
        Some(path) => config::load_settings_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => config::load_settings().context("loading settings")?,
    };
    let connection = ConnectionConfig::from_env(&settings).context("reading DB_* environment")?;
    tracing::info!(
        "Starting pg-gateway for {}",
        connection.connection_string()
    );

    // Sessions are not Send, so requests run as local tasks on one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, serve(connection, settings, cli.skip_probe))
}

async fn serve(connection: ConnectionConfig, settings: Settings, skip_probe: bool) -> Result<()> {
    let gateway = Rc::new(Gateway::new(PgConnector, connection, settings));

    if !skip_probe {
        let gateway = Rc::clone(&gateway);
        tokio::task::spawn_local(async move {
            gateway.startup_probe().await;
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::task::spawn_local(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &line).await {
                tracing::error!("failed to write response: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let gateway = Rc::clone(&gateway);
        let tx = tx.clone();
        tokio::task::spawn_local(async move {
            let response = dispatch::dispatch(&*gateway, &line).await;
            if tx.send(response.to_string()).is_err() {
                tracing::warn!("response dropped: writer closed");
            }
        });
    }

    // Stdin closed: let in-flight requests finish, then flush.
    drop(tx);
    writer.await.context("response writer")?;
    let stats = gateway.stats();
    tracing::info!(
        acquired = stats.acquired,
        outstanding = stats.outstanding(),
        "stdin closed, shutting down"
    );
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
