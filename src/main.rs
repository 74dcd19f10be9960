//! Partyroom CLI entry point.
//!
//! Loads an optional TOML config, binds its `[[parties]]` to the bundled
//! demo workers, and serves them over HTTP and WebSockets.

mod demo;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use partyroom_common::{ConfigFile, PartyEntry};
use partyroom_host::LocalHost;
use partyroom_server::{PartyroomServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "partyroom", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    init_tracing(cli.json_logs || file.server.json_logs);
    info!("Starting partyroom");

    let parties = if file.parties.is_empty() {
        default_parties()
    } else {
        file.parties.clone()
    };

    let registry = demo::registry();
    let mut builder = LocalHost::builder().config(file.runtime.clone());
    for entry in &parties {
        let Some(definition) = registry.get(entry.worker.as_str()) else {
            bail!(
                "party '{}' names unknown worker '{}' (available: {})",
                entry.name,
                entry.worker,
                registry.keys().copied().collect::<Vec<_>>().join(", ")
            );
        };
        info!(party = %entry.name, worker = %entry.worker, "Binding party");
        builder = builder.party(entry.name.clone(), definition.clone());
    }
    let host = builder.build().context("invalid party configuration")?;

    let mut server_config = ServerConfig::from_file(&file.server, &file.admin)?;
    if let Some(bind) = cli.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    info!(bind_addr = %server_config.bind_addr, "Configuration loaded");
    info!("Server initialized. Available endpoints:");
    info!("  GET  /health                  - Health check");
    info!("  GET  /ready                   - Readiness check");
    info!("  ANY  /party/:room             - Main party room");
    info!("  ANY  /parties/:party/:room    - Named party room");

    PartyroomServer::new(host, server_config).run().await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,partyroom=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn default_parties() -> Vec<PartyEntry> {
    vec![
        PartyEntry {
            name: "main".into(),
            worker: "chat".into(),
        },
        PartyEntry {
            name: "counter".into(),
            worker: "counter".into(),
        },
    ]
}
