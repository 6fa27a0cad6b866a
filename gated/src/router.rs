//! The gate's request surface: pure request/response logic over a deps
//! record, independent of the socket transport.

use std::{
    sync::{Arc, Mutex},
    time::{Instant, SystemTime},
};

use axum::{
    Json,
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing,
};
use gate_api::types::{
    ErrorResponse, HealthResponse, IdentityResponse, ProjectNumberResponse,
    TokenResponse, UniverseDomainResponse, WRAPPED_COMMAND_HEADER,
};
use gate_common::{
    audit::{AuditLevel, AuditRecord, AuditResult, AuditSink},
    scopes,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::Authenticator,
    confirm::Confirmer,
    rate_limit::{ProdRateLimiter, ReleaseOutcome},
    summary,
};

/// Everything a request handler needs. The listener exclusively owns this
/// record; request tasks borrow it through the shared [`Arc`].
pub struct GateDeps {
    pub auth: Authenticator,
    pub confirmer: Arc<dyn Confirmer>,
    pub audit: Arc<dyn AuditSink>,
    /// Never held across an await.
    pub limiter: Mutex<ProdRateLimiter>,
    pub started_at: Instant,
}

const DEV_TOKEN_ENDPOINT: &str = "/token";
const PROD_TOKEN_ENDPOINT: &str = "/token?level=prod";

/// Build the gate router. All endpoints are GET; axum answers 405 for other
/// methods on known paths and the fallback answers 404 otherwise.
pub fn router(deps: Arc<GateDeps>) -> Router {
    Router::new()
        .route("/health", routing::get(health))
        .route("/identity", routing::get(identity))
        .route("/project-number", routing::get(project_number))
        .route("/universe-domain", routing::get(universe_domain))
        .route("/token", routing::get(token))
        .fallback(not_found)
        .with_state(deps)
}

async fn health(State(deps): State<Arc<GateDeps>>) -> Response {
    let uptime_seconds = deps.started_at.elapsed().as_secs().max(1);
    Json(HealthResponse {
        status: "ok".to_owned(),
        uptime_seconds,
    })
    .into_response()
}

async fn identity(State(deps): State<Arc<GateDeps>>) -> Response {
    match deps.auth.identity_email().await {
        Ok(email) => Json(IdentityResponse { email }).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn project_number(State(deps): State<Arc<GateDeps>>) -> Response {
    match deps.auth.project_number().await {
        Ok(project_number) =>
            Json(ProjectNumberResponse { project_number }).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn universe_domain(State(deps): State<Arc<GateDeps>>) -> Response {
    match deps.auth.universe_domain().await {
        Ok(universe_domain) =>
            Json(UniverseDomainResponse { universe_domain }).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    scopes: Option<String>,
}

async fn token(
    State(deps): State<Arc<GateDeps>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let scope_list = query
        .scopes
        .as_deref()
        .map(scopes::parse_scopes_param)
        .unwrap_or_default();

    // Anything other than an explicit prod request is a dev request.
    if query.level.as_deref() == Some("prod") {
        prod_token(&deps, &scope_list, &headers).await
    } else {
        dev_token(&deps, &scope_list).await
    }
}

async fn dev_token(deps: &GateDeps, scope_list: &[String]) -> Response {
    match deps.auth.mint_dev_token(scope_list).await {
        Ok(token) => {
            deps.audit.record(AuditRecord::new(
                DEV_TOKEN_ENDPOINT,
                AuditLevel::Dev,
                AuditResult::Granted,
            ));
            let expires_in = token.expires_in_secs(SystemTime::now());
            Json(TokenResponse::bearer(token.access_token, expires_in))
                .into_response()
        }
        Err(err) => {
            deps.audit.record(
                AuditRecord::new(
                    DEV_TOKEN_ENDPOINT,
                    AuditLevel::Dev,
                    AuditResult::Error,
                )
                .with_error(&err),
            );
            internal_error(err)
        }
    }
}

/// The prod pipeline: rate-limit -> identity -> confirm -> mint. Every path
/// that acquired the limiter releases it exactly once, and every request
/// that reaches this function emits exactly one audit record.
async fn prod_token(
    deps: &GateDeps,
    scope_list: &[String],
    headers: &HeaderMap,
) -> Response {
    if let Err(reason) = acquire(deps) {
        warn!("prod token request rate-limited: {reason}");
        deps.audit.record(
            AuditRecord::new(
                PROD_TOKEN_ENDPOINT,
                AuditLevel::Prod,
                AuditResult::RateLimited,
            )
            .with_error(&reason),
        );
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new(reason)),
        )
            .into_response();
    }

    let email = match deps.auth.identity_email().await {
        Ok(email) => email,
        Err(err) => {
            release(deps, ReleaseOutcome::Error);
            deps.audit.record(
                AuditRecord::new(
                    PROD_TOKEN_ENDPOINT,
                    AuditLevel::Prod,
                    AuditResult::Error,
                )
                .with_error(&err),
            );
            return internal_error(err);
        }
    };

    let command_summary = headers
        .get(WRAPPED_COMMAND_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| summary::parse_wrapped_command(Some(raw)))
        .map(|argv| summary::summarize_command(&argv));

    let approved = match deps
        .confirmer
        .confirm_prod_access(&email, command_summary.as_deref())
        .await
    {
        Ok(approved) => approved,
        Err(err) => {
            release(deps, ReleaseOutcome::Error);
            deps.audit.record(
                AuditRecord::new(
                    PROD_TOKEN_ENDPOINT,
                    AuditLevel::Prod,
                    AuditResult::Error,
                )
                .with_email(&email)
                .with_error(format!("confirmation failed: {err:#}")),
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(format!(
                    "confirmation failed: {err:#}"
                ))),
            )
                .into_response();
        }
    };

    if !approved {
        info!("prod access denied by user for {email}");
        release(deps, ReleaseOutcome::Denied);
        deps.audit.record(
            AuditRecord::new(
                PROD_TOKEN_ENDPOINT,
                AuditLevel::Prod,
                AuditResult::Denied,
            )
            .with_email(&email),
        );
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "production access denied by the user",
            )),
        )
            .into_response();
    }

    match deps.auth.mint_prod_token(scope_list).await {
        Ok(token) => {
            info!("prod access granted for {email}");
            release(deps, ReleaseOutcome::Granted);
            deps.audit.record(
                AuditRecord::new(
                    PROD_TOKEN_ENDPOINT,
                    AuditLevel::Prod,
                    AuditResult::Granted,
                )
                .with_email(&email),
            );
            let expires_in = token.expires_in_secs(SystemTime::now());
            Json(TokenResponse::bearer(token.access_token, expires_in))
                .into_response()
        }
        Err(err) => {
            release(deps, ReleaseOutcome::Error);
            deps.audit.record(
                AuditRecord::new(
                    PROD_TOKEN_ENDPOINT,
                    AuditLevel::Prod,
                    AuditResult::Error,
                )
                .with_email(&email)
                .with_error(&err),
            );
            internal_error(err)
        }
    }
}

fn acquire(deps: &GateDeps) -> Result<(), String> {
    let mut limiter = deps.limiter.lock().unwrap_or_else(|e| e.into_inner());
    limiter.acquire(Instant::now())
}

fn release(deps: &GateDeps, outcome: ReleaseOutcome) {
    let mut limiter = deps.limiter.lock().unwrap_or_else(|e| e.into_inner());
    limiter.release(Instant::now(), outcome);
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(err.to_string())),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "no such endpoint\n").into_response()
}
