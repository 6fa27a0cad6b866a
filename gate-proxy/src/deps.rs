use std::{sync::Arc, time::Instant};

use crate::providers::{TokenProvider, ValueProvider};

/// Everything the metadata router serves from. Immutable after start.
pub struct ProxyDeps {
    /// Backs `.../service-accounts/default/token`.
    pub token_provider: Arc<dyn TokenProvider>,
    /// Backs `.../project/numeric-project-id`; 404 when absent.
    pub project_number: Option<Arc<dyn ValueProvider>>,
    /// Backs `.../universe/universe-domain`; 404 when absent.
    pub universe_domain: Option<Arc<dyn ValueProvider>>,
    /// Served at `.../project/project-id`.
    pub project_id: String,
    /// The advertised service-account email, when known.
    pub email: Option<String>,
    /// Scopes listed at `.../service-accounts/default/scopes`.
    pub scopes: Vec<String>,
    pub started_at: Instant,
}

impl ProxyDeps {
    /// Minimal deps: a token provider and a project id, default scopes.
    pub fn new(
        token_provider: Arc<dyn TokenProvider>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            token_provider,
            project_number: None,
            universe_domain: None,
            project_id: project_id.into(),
            email: None,
            scopes: vec![gate_common::scopes::CLOUD_PLATFORM.to_owned()],
            started_at: Instant::now(),
        }
    }
}
