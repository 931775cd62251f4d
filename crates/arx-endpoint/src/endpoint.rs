//! Endpoint facade — construction, startup, shutdown, key rotation.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use arx_core::crypto::{ClientPublicKey, NodeKeypair};

use crate::backend::NodeBackend;
use crate::directory::{NetworkDirectory, Roster};
use crate::registry::SessionRegistry;
use crate::router::{router, EndpointState};

/// The running client authentication endpoint.
///
/// Owns the node key, the session registry, and the serving task.
/// Dropping the value aborts nothing by itself; call [`shutdown`] for a
/// graceful stop.
///
/// [`shutdown`]: ClientEndpoint::shutdown
pub struct ClientEndpoint {
    state: EndpointState,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientEndpoint {
    /// Bind `addr` (port 0 picks an ephemeral port) and start serving.
    pub async fn start(
        node_key: NodeKeypair,
        addr: SocketAddr,
        backend: Arc<dyn NodeBackend>,
        roster: Roster,
    ) -> anyhow::Result<Self> {
        let state = EndpointState {
            node_key: Arc::new(node_key),
            registry: Arc::new(SessionRegistry::new()),
            backend,
            directory: Arc::new(NetworkDirectory::new(roster)),
        };

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind client endpoint")?;
        let local_addr = listener
            .local_addr()
            .context("failed to read endpoint address")?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let app = router(state.clone());
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            });
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "client endpoint server failed");
            }
        });

        tracing::info!(addr = %local_addr, "client endpoint listening");
        Ok(Self {
            state,
            local_addr,
            shutdown_tx,
            serve_task: Mutex::new(Some(serve_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Clear the session key for `client_key`; the client must re-run
    /// `get_token` before its next command succeeds.
    pub async fn change_key_for(&self, client_key: &ClientPublicKey) {
        self.state.registry.change_key_for(client_key).await;
    }

    /// Stop serving and wait for in-flight requests to drain. Idempotent.
    pub async fn shutdown(&self) {
        let task = self.serve_task.lock().await.take();
        if let Some(task) = task {
            let _ = self.shutdown_tx.send(());
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "endpoint serve task join failed");
            }
            tracing::info!("client endpoint stopped");
        }
    }
}
