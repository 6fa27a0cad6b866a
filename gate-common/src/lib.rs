//! The `gate-common` crate contains types and functionality shared between
//! the gate daemon, the metadata proxy, and the elevation wrapper.

/// Audit record types and the append-only file sink.
pub mod audit;
/// Environment variable names, including the credential scrub list.
pub mod env;
/// User-private runtime directory resolution.
pub mod rundir;
/// OAuth scope canonicalization.
pub mod scopes;
/// A channel for broadcasting a one-shot shutdown signal.
pub mod shutdown;
/// Cached access tokens and the freshness margin.
pub mod token;
