//! arxd — arx ledger node daemon.
//!
//! Loads configuration, materialises the node key, assembles the roster,
//! and runs the client authentication endpoint until interrupted.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use arx_core::config::{ArxConfig, RosterEntry};
use arx_core::crypto::NodeKeypair;
use arx_endpoint::{ClientEndpoint, NodeInfo, NullBackend, Roster};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ArxConfig::load().context("failed to load configuration")?;

    // Bounded request pool by default; worker_threads unset means the
    // runtime picks its own size.
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.server.worker_threads {
        builder.worker_threads(workers);
    }
    let runtime = builder
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: ArxConfig) -> Result<()> {
    let node_key = load_or_create_key(&config.identity.key_path)?;
    tracing::info!(
        public_key = hex::encode(node_key.public().pack()),
        "node key ready"
    );

    let roster = build_roster(&config.roster)?;
    tracing::info!(peers = roster.len(), "roster assembled");

    let addr: SocketAddr = format!("{}:{}", config.server.listen_addr, config.server.port)
        .parse()
        .context("invalid listen address")?;
    let endpoint = ClientEndpoint::start(node_key, addr, Arc::new(NullBackend), roster).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    tracing::info!("shutdown signal received");
    endpoint.shutdown().await;
    Ok(())
}

/// Read the hex seed at `path`, generating and persisting one on first run.
fn load_or_create_key(path: &Path) -> Result<NodeKeypair> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read key file {}", path.display()))?;
        let bytes = hex::decode(text.trim()).context("key file is not valid hex")?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("key file must hold a 32-byte seed"))?;
        Ok(NodeKeypair::from_seed(seed))
    } else {
        let key = NodeKeypair::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, hex::encode(*key.seed()))
            .with_context(|| format!("failed to write key file {}", path.display()))?;
        tracing::info!(path = %path.display(), "generated new node key");
        Ok(key)
    }
}

fn build_roster(entries: &[RosterEntry]) -> Result<Roster> {
    let mut roster = Roster::new();
    for entry in entries {
        let packed_key = hex::decode(&entry.public_key)
            .with_context(|| format!("roster entry {} has invalid key hex", entry.node_id))?;
        roster.insert(
            entry.node_id.clone(),
            NodeInfo {
                host: entry.host.clone(),
                client_port: entry.client_port,
                packed_key,
            },
        );
    }
    Ok(roster)
}
