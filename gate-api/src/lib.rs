//! The HTTP surface shared between the gate daemon and its clients: wire
//! types, the HTTP-over-Unix-socket client, and server plumbing.

/// The `GateClient`: HTTP over the gate's Unix socket, with token caches.
pub mod client;
/// Serve an [`axum::Router`] on Unix / TCP listeners with graceful shutdown.
pub mod server;
/// Wire types for the gate's request/response bodies.
pub mod types;
/// Plain HTTP/1 requests over a Unix domain socket.
pub mod uds;
