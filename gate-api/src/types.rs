//! Request / response bodies for the gate daemon's HTTP surface.

use serde::{Deserialize, Serialize};

/// Header carrying the wrapped command line (a JSON array of argv strings)
/// on prod token requests, so the confirmation dialog can show what is about
/// to run.
pub const WRAPPED_COMMAND_HEADER: &str = "x-wrapped-command";

/// `GET /health`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
}

/// `GET /identity`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub email: String,
}

/// `GET /project-number`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectNumberResponse {
    pub project_number: String,
}

/// `GET /universe-domain`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniverseDomainResponse {
    pub universe_domain: String,
}

/// `GET /token[?level=prod][&scopes=a,b]`
///
/// The daemon always fills every field; older deployments may omit
/// `expires_in`, in which case clients assume one hour.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn bearer(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_in: Some(expires_in),
            token_type: Some("Bearer".to_owned()),
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"..") // don't log tokens
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Error body used by every non-2xx gate response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
