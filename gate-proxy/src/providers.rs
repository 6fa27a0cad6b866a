//! Token and metadata providers backing the proxy's endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use gate_api::client::GateClient;
use gate_common::token::CachedToken;

/// Produces the access token served at `.../service-accounts/default/token`.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> anyhow::Result<CachedToken>;
}

/// Produces a single metadata string (numeric project id, universe domain).
#[async_trait]
pub trait ValueProvider: Send + Sync {
    async fn get(&self) -> anyhow::Result<String>;
}

/// Always returns the same pre-computed token.
///
/// The elevation wrapper backs its ephemeral proxy with this: the prod token
/// is minted exactly once, up front, and the proxy never talks to the gate.
pub struct StaticTokenProvider {
    token: CachedToken,
}

impl StaticTokenProvider {
    pub fn new(token: CachedToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> anyhow::Result<CachedToken> {
        Ok(self.token.clone())
    }
}

/// Providers backed by the gate daemon over its Unix socket.
///
/// Cloning shares the underlying [`GateClient`] and therefore its caches.
#[derive(Clone)]
pub struct GateProviders {
    client: Arc<GateClient>,
    scopes: Vec<String>,
}

impl GateProviders {
    pub fn new(client: Arc<GateClient>, scopes: Vec<String>) -> Self {
        Self { client, scopes }
    }
}

#[async_trait]
impl TokenProvider for GateProviders {
    async fn get_token(&self) -> anyhow::Result<CachedToken> {
        let scopes =
            (!self.scopes.is_empty()).then_some(self.scopes.as_slice());
        Ok(self.client.get_token(scopes).await?)
    }
}

/// `ValueProvider` for the numeric project id, via the gate.
pub struct GateProjectNumber(pub Arc<GateClient>);

#[async_trait]
impl ValueProvider for GateProjectNumber {
    async fn get(&self) -> anyhow::Result<String> {
        Ok(self.0.numeric_project_id().await?)
    }
}

/// `ValueProvider` for the universe domain, via the gate.
pub struct GateUniverseDomain(pub Arc<GateClient>);

#[async_trait]
impl ValueProvider for GateUniverseDomain {
    async fn get(&self) -> anyhow::Result<String> {
        Ok(self.0.universe_domain().await?)
    }
}
