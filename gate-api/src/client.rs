//! The in-container client for the gate daemon's Unix socket.

use std::{
    fs,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use gate_common::{
    scopes,
    token::{CachedToken, ScopedTokenCache},
};
use http::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::{
    types::{
        ErrorResponse, HealthResponse, IdentityResponse, ProjectNumberResponse,
        TokenResponse, UniverseDomainResponse, WRAPPED_COMMAND_HEADER,
    },
    uds,
};

/// Deadline for ordinary gate requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the startup health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Deadline for prod token requests, which block on a human confirmation
/// dialog with its own 60s timeout.
const PROD_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifetime assumed when the daemon omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Error)]
pub enum GateClientError {
    #[error(
        "gate socket not found at {path}; start the gate daemon (`gated`) on \
         the host and retry"
    )]
    SocketMissing { path: PathBuf },

    #[error(
        "{path} exists but is not a Unix socket; remove it and restart the \
         gate daemon"
    )]
    NotASocket { path: PathBuf },

    #[error(
        "the gate daemon at {path} did not answer a health probe: {source}; \
         restart the gate daemon"
    )]
    Unhealthy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "could not reach the gate daemon at {path}: {source}; restart the \
         gate daemon if this persists"
    )]
    Transport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gate request {endpoint} failed ({status}): {message}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("gate response from {endpoint} was malformed: {message}")]
    BadResponse {
        endpoint: &'static str,
        message: String,
    },
}

/// HTTP client for the gate daemon, with per-field caches.
///
/// Tokens are cached per canonical scope key with the shared freshness
/// margin; the project number and universe domain are cached for the client
/// lifetime. Caches are private to this instance and never shared across
/// processes.
pub struct GateClient {
    socket_path: PathBuf,
    tokens: ScopedTokenCache,
    project_number: OnceCell<String>,
    universe_domain: OnceCell<String>,
}

impl GateClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            tokens: ScopedTokenCache::new(),
            project_number: OnceCell::new(),
            universe_domain: OnceCell::new(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Verify that `socket_path` points at a live gate daemon.
    ///
    /// Each failure surfaces a distinct, actionable message: missing socket,
    /// non-socket file, or a daemon that no longer answers.
    pub async fn check_gate_socket(
        socket_path: &Path,
    ) -> Result<(), GateClientError> {
        // symlink_metadata: a symlink planted at the socket path must show up
        // as NotASocket rather than being followed.
        let metadata = match fs::symlink_metadata(socket_path) {
            Ok(metadata) => metadata,
            Err(_) => {
                return Err(GateClientError::SocketMissing {
                    path: socket_path.to_owned(),
                });
            }
        };
        if !metadata.file_type().is_socket() {
            return Err(GateClientError::NotASocket {
                path: socket_path.to_owned(),
            });
        }

        let resp =
            uds::get(socket_path, "/health", &[], HEALTH_PROBE_TIMEOUT)
                .await
                .map_err(|source| GateClientError::Unhealthy {
                    path: socket_path.to_owned(),
                    source,
                })?;
        if !resp.is_success() {
            return Err(GateClientError::Unhealthy {
                path: socket_path.to_owned(),
                source: std::io::Error::other(format!(
                    "health probe returned {}",
                    resp.status
                )),
            });
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse, GateClientError> {
        self.get_json("/health", &[], REQUEST_TIMEOUT).await
    }

    /// Fetch a dev token, going to the daemon only when the cache is stale.
    pub async fn get_token(
        &self,
        requested_scopes: Option<&[String]>,
    ) -> Result<CachedToken, GateClientError> {
        let scope_list = requested_scopes.unwrap_or(&[]);
        let scope_key = scopes::canonical_key(scope_list);

        let now = SystemTime::now();
        if let Some(cached) = self.tokens.get(&scope_key, now) {
            return Ok(cached);
        }

        let endpoint = "/token";
        let path_and_query = if scope_list.is_empty() {
            endpoint.to_owned()
        } else {
            format!("{endpoint}?scopes={}", scope_list.join(","))
        };
        let resp: TokenResponse = self
            .get_json_at(endpoint, &path_and_query, &[], REQUEST_TIMEOUT)
            .await?;

        let token = token_from_response(endpoint, resp, now)?;
        self.tokens.put(scope_key, token.clone());
        Ok(token)
    }

    /// Fetch a prod token, passing the wrapped command line for the
    /// confirmation dialog. Never cached.
    pub async fn get_prod_token(
        &self,
        wrapped_command: &[String],
    ) -> Result<CachedToken, GateClientError> {
        let endpoint = "/token?level=prod";
        let header_value = serde_json::to_string(wrapped_command)
            .unwrap_or_else(|_| "[]".to_owned());
        let resp: TokenResponse = self
            .get_json_at(
                "/token?level=prod",
                endpoint,
                &[(WRAPPED_COMMAND_HEADER, header_value)],
                PROD_REQUEST_TIMEOUT,
            )
            .await?;
        token_from_response("/token?level=prod", resp, SystemTime::now())
    }

    pub async fn identity_email(&self) -> Result<String, GateClientError> {
        let resp: IdentityResponse =
            self.get_json("/identity", &[], REQUEST_TIMEOUT).await?;
        Ok(resp.email)
    }

    /// The project's numeric id. Cached permanently after the first success.
    pub async fn numeric_project_id(&self) -> Result<String, GateClientError> {
        self.project_number
            .get_or_try_init(|| async {
                let resp: ProjectNumberResponse = self
                    .get_json("/project-number", &[], REQUEST_TIMEOUT)
                    .await?;
                Ok(resp.project_number)
            })
            .await
            .cloned()
    }

    /// The universe domain. Cached permanently after the first success.
    pub async fn universe_domain(&self) -> Result<String, GateClientError> {
        self.universe_domain
            .get_or_try_init(|| async {
                let resp: UniverseDomainResponse = self
                    .get_json("/universe-domain", &[], REQUEST_TIMEOUT)
                    .await?;
                Ok(resp.universe_domain)
            })
            .await
            .cloned()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, GateClientError> {
        self.get_json_at(endpoint, endpoint, headers, timeout).await
    }

    /// `endpoint` labels errors; `path_and_query` is what actually goes on
    /// the wire (it may carry extra query parameters).
    async fn get_json_at<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path_and_query: &str,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, GateClientError> {
        let resp = uds::get(&self.socket_path, path_and_query, headers, timeout)
            .await
            .map_err(|source| GateClientError::Transport {
                path: self.socket_path.clone(),
                source,
            })?;

        if !resp.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&resp.body)
                .map(|body| body.error)
                .unwrap_or_else(|_| {
                    String::from_utf8_lossy(&resp.body).into_owned()
                });
            return Err(GateClientError::Status {
                endpoint,
                status: resp.status,
                message,
            });
        }

        serde_json::from_slice(&resp.body).map_err(|err| {
            GateClientError::BadResponse {
                endpoint,
                message: err.to_string(),
            }
        })
    }
}

fn token_from_response(
    endpoint: &'static str,
    resp: TokenResponse,
    now: SystemTime,
) -> Result<CachedToken, GateClientError> {
    if resp.access_token.is_empty() {
        return Err(GateClientError::BadResponse {
            endpoint,
            message: "response contained an empty access_token".to_owned(),
        });
    }
    let expires_in = resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    Ok(CachedToken {
        access_token: resp.access_token,
        expires_at: now + Duration::from_secs(expires_in),
    })
}
