//! Serve an [`axum::Router`] with graceful shutdown, on either the gate's
//! Unix listener or the metadata proxy's TCP listener.
//!
//! Shape: the server future runs until a [`ShutdownChannel`] signal, then
//! gets a short grace period to drain in-flight connections before we stop
//! waiting on it.

use std::{future::IntoFuture, net::SocketAddr, time::Duration};

use axum::Router;
use gate_common::shutdown::ShutdownChannel;
use tokio::{
    net::{TcpListener, UnixListener},
    signal::unix::{SignalKind, signal},
};
use tracing::{debug, error, info, warn};

/// How long we wait for in-flight connections after a shutdown signal.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Serve `router` on a Unix listener until `shutdown` fires.
pub async fn serve_unix(
    listener: UnixListener,
    router: Router,
    shutdown: ShutdownChannel,
) {
    let mut drain_shutdown = shutdown.clone();
    let server_fut = axum::serve(listener, router)
        .with_graceful_shutdown(async move { drain_shutdown.recv().await })
        .into_future();
    run_to_completion("gate", server_fut, shutdown).await
}

/// Serve `router` on a TCP listener until `shutdown` fires.
///
/// Connection info (the peer address) is propagated so handlers can read the
/// peer's port for PID validation.
pub async fn serve_tcp(
    listener: TcpListener,
    router: Router,
    shutdown: ShutdownChannel,
) {
    let mut drain_shutdown = shutdown.clone();
    let server_fut = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { drain_shutdown.recv().await })
    .into_future();
    run_to_completion("metadata proxy", server_fut, shutdown).await
}

/// SIGTERM / SIGINT trigger a graceful shutdown via `shutdown`.
///
/// Daemons install this once at startup; the elevation wrapper does NOT use
/// it (it forwards signals to its child instead).
pub fn spawn_signal_handlers(
    shutdown: ShutdownChannel,
) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        shutdown.send();
    });
    Ok(())
}

async fn run_to_completion(
    label: &str,
    server_fut: impl Future<Output = std::io::Result<()>>,
    mut shutdown: ShutdownChannel,
) {
    tokio::pin!(server_fut);
    tokio::select! {
        biased; // Observe the shutdown signal before a server error.
        () = shutdown.recv() => {
            match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, server_fut).await
            {
                Ok(Ok(())) => debug!("{label} server graceful shutdown done"),
                Ok(Err(err)) =>
                    warn!("{label} server errored during shutdown: {err}"),
                Err(_) => warn!("{label} server timed out during shutdown"),
            }
        }
        result = &mut server_fut => match result {
            Ok(()) => debug!("{label} server exited"),
            Err(err) => error!("{label} server exited early: {err}"),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn tcp_server_stops_on_shutdown_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new()
            .route("/", axum::routing::get(|| async { "ok" }));

        let shutdown = ShutdownChannel::new();
        let server = tokio::spawn(serve_tcp(listener, router, shutdown.clone()));

        // Server answers while running.
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET / HTTP/1.1\r\nhost: t\r\nconnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 200"));

        shutdown.send();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server should stop after shutdown signal")
            .unwrap();
    }
}
