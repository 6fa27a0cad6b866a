//! Emulation of the provider's instance-metadata HTTP surface, enough to
//! satisfy all known client libraries.
//!
//! The interesting request/response logic is in [`handle`], which is pure
//! with respect to the transport; [`router`] adapts it to axum.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use http::{Method, StatusCode, header};
use serde_json::json;
use tracing::debug;

use crate::deps::ProxyDeps;

const FLAVOR_HEADER: &str = "metadata-flavor";
const FLAVOR_VALUE: &str = "Google";

const GUARDED_PREFIX: &str = "/computeMetadata/";
const SA_PREFIX: &str = "/computeMetadata/v1/instance/service-accounts";

/// A transport-independent response. Every response (the ping included)
/// carries the `Metadata-Flavor: Google` response header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataResponse {
    pub status: StatusCode,
    pub body: String,
    pub json: bool,
}

impl MetadataResponse {
    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            json: false,
        }
    }

    fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            json: true,
        }
    }

    fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "not found\n")
    }
}

/// Route one metadata request.
///
/// `has_flavor` reports whether the request carried
/// `Metadata-Flavor: Google`; it is enforced for everything under
/// `/computeMetadata/` but not for the `/` presence probe.
pub async fn handle(
    deps: &ProxyDeps,
    method: &Method,
    path: &str,
    query: &str,
    has_flavor: bool,
) -> MetadataResponse {
    if method != Method::GET {
        return MetadataResponse::text(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed\n",
        );
    }

    // Presence probe used by client libraries to detect a metadata server.
    if path == "/" || path.is_empty() {
        return MetadataResponse::text(StatusCode::OK, "ok");
    }

    if path.starts_with(GUARDED_PREFIX) && !has_flavor {
        return MetadataResponse::text(
            StatusCode::FORBIDDEN,
            "Missing required header: Metadata-Flavor: Google\n",
        );
    }

    let normalized = normalize_path(path);
    let aliased = alias_service_account(&normalized);

    match aliased.as_str() {
        "/computeMetadata/v1/project/project-id" =>
            MetadataResponse::text(StatusCode::OK, deps.project_id.clone()),

        "/computeMetadata/v1/project/numeric-project-id" =>
            value_endpoint(deps.project_number.as_deref()).await,

        "/computeMetadata/v1/universe/universe-domain"
        | "/computeMetadata/v1/universe/universe_domain" =>
            value_endpoint(deps.universe_domain.as_deref()).await,

        "/computeMetadata/v1/instance/service-accounts" =>
            if is_recursive(query) {
                service_accounts_recursive(deps)
            } else {
                service_accounts_listing(deps)
            },

        "/computeMetadata/v1/instance/service-accounts/default" =>
            if is_recursive(query) {
                MetadataResponse::json(StatusCode::OK, &service_account_info(deps))
            } else {
                MetadataResponse::text(
                    StatusCode::OK,
                    "aliases\nemail\nidentity\nscopes\ntoken\n",
                )
            },

        "/computeMetadata/v1/instance/service-accounts/default/token" =>
            token_endpoint(deps).await,

        "/computeMetadata/v1/instance/service-accounts/default/email" =>
            match &deps.email {
                Some(email) =>
                    MetadataResponse::text(StatusCode::OK, email.clone()),
                None => MetadataResponse::not_found(),
            },

        "/computeMetadata/v1/instance/service-accounts/default/scopes" => {
            let mut body = deps.scopes.join("\n");
            body.push('\n');
            MetadataResponse::text(StatusCode::OK, body)
        }

        "/computeMetadata/v1/instance/service-accounts/default/identity" =>
            match query_param(query, "audience") {
                Some(audience) if !audience.is_empty() =>
                    MetadataResponse::text(
                        StatusCode::NOT_FOUND,
                        "identity tokens are not supported\n",
                    ),
                _ => MetadataResponse::text(
                    StatusCode::BAD_REQUEST,
                    "non-empty audience parameter required\n",
                ),
            },

        other => {
            debug!("metadata request for unknown path {other}");
            MetadataResponse::not_found()
        }
    }
}

/// Trailing slashes are normalized away before matching.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Rewrite `service-accounts/<id>/…` to `service-accounts/default/…` for any
/// non-empty `<id>`. This proxy serves a single identity, and client
/// libraries probe by the email they were configured with.
fn alias_service_account(path: &str) -> String {
    let Some(rest) = path.strip_prefix(SA_PREFIX) else {
        return path.to_owned();
    };
    let Some(rest) = rest.strip_prefix('/') else {
        // The bare directory itself.
        return path.to_owned();
    };

    let (id, remainder) = match rest.split_once('/') {
        Some((id, remainder)) => (id, Some(remainder)),
        None => (rest, None),
    };
    if id.is_empty() || id == "default" {
        return path.to_owned();
    }

    match remainder {
        Some(remainder) => format!("{SA_PREFIX}/default/{remainder}"),
        None => format!("{SA_PREFIX}/default"),
    }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

fn is_recursive(query: &str) -> bool {
    query_param(query, "recursive")
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

async fn value_endpoint(
    provider: Option<&dyn crate::providers::ValueProvider>,
) -> MetadataResponse {
    let Some(provider) = provider else {
        return MetadataResponse::not_found();
    };
    match provider.get().await {
        Ok(value) => MetadataResponse::text(StatusCode::OK, value),
        Err(err) => MetadataResponse::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metadata lookup failed: {err:#}\n"),
        ),
    }
}

async fn token_endpoint(deps: &ProxyDeps) -> MetadataResponse {
    match deps.token_provider.get_token().await {
        Ok(token) => {
            let expires_in =
                token.expires_in_secs(std::time::SystemTime::now());
            MetadataResponse::json(
                StatusCode::OK,
                &json!({
                    "access_token": token.access_token,
                    "expires_in": expires_in,
                    "token_type": "Bearer",
                }),
            )
        }
        Err(err) => MetadataResponse::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("token fetch failed: {err:#}\n"),
        ),
    }
}

/// The recursive service-account info object. Never includes `token` or
/// `identity`.
fn service_account_info(deps: &ProxyDeps) -> serde_json::Value {
    let mut info = serde_json::Map::new();
    info.insert("aliases".to_owned(), json!(["default"]));
    if let Some(email) = &deps.email {
        info.insert("email".to_owned(), json!(email));
    }
    info.insert("scopes".to_owned(), json!(deps.scopes));
    serde_json::Value::Object(info)
}

fn service_accounts_recursive(deps: &ProxyDeps) -> MetadataResponse {
    let info = service_account_info(deps);
    let mut accounts = serde_json::Map::new();
    accounts.insert("default".to_owned(), info.clone());
    if let Some(email) = &deps.email {
        accounts.insert(email.clone(), info);
    }
    MetadataResponse::json(StatusCode::OK, &serde_json::Value::Object(accounts))
}

fn service_accounts_listing(deps: &ProxyDeps) -> MetadataResponse {
    let mut body = "default/\n".to_owned();
    if let Some(email) = &deps.email {
        body.push_str(email);
        body.push_str("/\n");
    }
    MetadataResponse::text(StatusCode::OK, body)
}

// --- axum adapter --- //

/// Every metadata path funnels through the same dispatcher, so the flavor
/// check, aliasing, and normalization behave identically regardless of how
/// axum would have matched the route.
pub fn router(deps: Arc<ProxyDeps>) -> axum::Router {
    axum::Router::new().fallback(dispatch).with_state(deps)
}

async fn dispatch(
    State(deps): State<Arc<ProxyDeps>>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().unwrap_or("").to_owned();
    let has_flavor = request
        .headers()
        .get(FLAVOR_HEADER)
        .is_some_and(|value| value.as_bytes() == FLAVOR_VALUE.as_bytes());

    let resp = handle(&deps, &method, &path, &query, has_flavor).await;
    into_http_response(resp)
}

fn into_http_response(resp: MetadataResponse) -> Response {
    let content_type = if resp.json {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    Response::builder()
        .status(resp.status)
        .header(FLAVOR_HEADER, FLAVOR_VALUE)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(resp.body))
        .expect("static response parts are valid")
}
