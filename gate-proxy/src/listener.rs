//! The proxy's TCP listener: loopback-only, ephemeral-port capable, with an
//! optional per-connection PID-ancestry check.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gate_common::shutdown::ShutdownChannel;
use http::StatusCode;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::{deps::ProxyDeps, pid::ProcFs, router};

/// Restrict connections to processes descending from one ancestor.
///
/// The elevation wrapper configures this with its own PID so that only the
/// wrapped command (and its children) can read the prod token.
#[derive(Clone, Debug)]
pub struct AncestryCheck {
    pub allowed_ancestor_pid: u32,
    pub procfs: ProcFs,
}

impl AncestryCheck {
    pub fn new(allowed_ancestor_pid: u32) -> Self {
        Self {
            allowed_ancestor_pid,
            procfs: ProcFs::default(),
        }
    }

    /// Whether the process owning the peer's port descends from the allowed
    /// ancestor. Any lookup failure counts as "no".
    fn permits(&self, peer_port: u16) -> bool {
        match self.procfs.owner_pid_of_local_port(peer_port) {
            Some(owner_pid) => self
                .procfs
                .is_descendant_of(owner_pid, self.allowed_ancestor_pid),
            None => false,
        }
    }
}

/// Build the proxy router, wrapping the metadata surface in the ancestry
/// check when one is configured.
pub fn proxy_router(
    deps: Arc<ProxyDeps>,
    ancestry: Option<AncestryCheck>,
) -> Router {
    let router = router::router(deps);
    match ancestry {
        Some(check) => router.layer(axum::middleware::from_fn_with_state(
            Arc::new(check),
            enforce_ancestry,
        )),
        None => router,
    }
}

async fn enforce_ancestry(
    State(check): State<Arc<AncestryCheck>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    // The peer's address is its end of the loopback connection, so its port
    // is the local port we look up in the proc net tables.
    if check.permits(peer.port()) {
        next.run(request).await
    } else {
        warn!(
            "rejecting metadata request from peer port {}: owner is not a \
             descendant of pid {}",
            peer.port(),
            check.allowed_ancestor_pid,
        );
        (
            StatusCode::FORBIDDEN,
            "connection owner is not permitted\n",
        )
            .into_response()
    }
}

/// A running metadata proxy.
pub struct ProxyHandle {
    port: u16,
    shutdown: ShutdownChannel,
    task: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` clients put in `GCE_METADATA_HOST`.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Stop the listener and wait for it to drain.
    pub async fn stop(self) {
        self.shutdown.send();
        let _ = self.task.await;
    }
}

/// Bind `127.0.0.1:<port>` (0 picks an ephemeral port) and serve the proxy
/// in a background task.
pub async fn spawn(
    deps: Arc<ProxyDeps>,
    port: u16,
    ancestry: Option<AncestryCheck>,
) -> anyhow::Result<ProxyHandle> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Could not bind 127.0.0.1:{port}"))?;
    let actual_port = listener
        .local_addr()
        .context("Could not read the bound port")?
        .port();

    let router = proxy_router(deps, ancestry);
    let shutdown = ShutdownChannel::new();
    let task = tokio::spawn(gate_api::server::serve_tcp(
        listener,
        router,
        shutdown.clone(),
    ));

    // Embedded (wrapper-owned) proxies should stay quiet; the standalone
    // binary logs the address itself.
    debug!("metadata proxy listening on 127.0.0.1:{actual_port}");
    Ok(ProxyHandle {
        port: actual_port,
        shutdown,
        task,
    })
}
