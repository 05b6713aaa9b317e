use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use termgate_common::{CredentialRecord, TermgateConfig};
use termgate_core::{
    JwtTokenVerifier, MemoryConnectionProvider, MemorySessionLogStore, Services, SessionHandle,
};
use termgate_protocol_http::HTTPProtocolServer;
use tracing::*;

pub(crate) async fn command(_cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "Termgate");

    let config = TermgateConfig::from_env()?;
    let address: SocketAddr = config
        .listen_address()
        .to_socket_addrs()?
        .next()
        .context("Cannot resolve the listen address")?;

    let token_verifier = Arc::new(JwtTokenVerifier::from_config(&config)?);
    let connections = Arc::new(MemoryConnectionProvider::new());
    seed_connections(&connections).await?;
    let session_logs = Arc::new(MemorySessionLogStore::new());

    let services = Services::with_providers(config, token_verifier, connections, session_logs);

    if console::user_attended() {
        info!("--------------------------------------------");
        info!("Termgate is now running.");
        info!("Accepting terminal duplex connections on {address:?}");
        info!("--------------------------------------------");
    }

    tokio::select! {
        result = HTTPProtocolServer::new(&services).run(address) => {
            result?;
        }
        _ = wait_for_shutdown_signal() => {
            info!("Shutting down");
        }
    }

    drain_sessions(&services).await;
    info!("Exiting");
    Ok(())
}

/// Optional bootstrap of the in-memory connection store from a JSON file
/// named by `CONNECTIONS_FILE`, for deployments without the full credential
/// store wired in.
async fn seed_connections(connections: &Arc<MemoryConnectionProvider>) -> Result<()> {
    #[derive(Deserialize)]
    struct SeedRecord {
        user_id: String,
        connection_id: String,
        #[serde(flatten)]
        record: CredentialRecord,
    }

    let Ok(path) = std::env::var("CONNECTIONS_FILE") else {
        return Ok(());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read connections file {path}"))?;
    let seeds: Vec<SeedRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse connections file {path}"))?;
    let count = seeds.len();
    for seed in seeds {
        connections
            .insert(&seed.user_id, &seed.connection_id, seed.record)
            .await;
    }
    info!(%path, count, "Seeded connection records");
    Ok(())
}

async fn drain_sessions(services: &Services) {
    for (client_id, session) in services.state.drain().await {
        debug!(%client_id, "Draining session");
        session.close().await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let sigterm = signal(SignalKind::terminate());
    match sigterm {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(error) => {
            warn!(?error, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
