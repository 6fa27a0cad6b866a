//! Detection of an enclosing elevated session via the sentinel env var.
//!
//! Best-effort by design: the sentinel's absence and any probe failure both
//! mean "no usable session", and the wrapper falls through to the normal
//! flow. A present-but-stale sentinel is logged but otherwise treated the
//! same way.

use std::time::Duration;

use tracing::{debug, warn};

/// Probe deadline per request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR_VALUE: &str = "Google";

/// A live parent session the wrapper can reuse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NestedSessionInfo {
    /// `host:port` of the parent's metadata proxy.
    pub metadata_host: String,
    pub email: String,
    pub project_id: String,
}

/// Whether a detected session satisfies the caller's project request:
/// either no project was explicitly requested, or it matches the session's.
pub fn should_reuse(
    session: &NestedSessionInfo,
    requested_project: Option<&str>,
) -> bool {
    requested_project.is_none_or(|project| project == session.project_id)
}

/// Probe the proxy named by the sentinel value. Returns `None` unless every
/// probe succeeds.
pub async fn detect(sentinel: Option<&str>) -> Option<NestedSessionInfo> {
    let metadata_host = sentinel?.trim();
    if metadata_host.is_empty() {
        return None;
    }

    match probe_session(metadata_host).await {
        Some(session) => Some(session),
        None => {
            // Stale sentinel: the env var points at a proxy which no longer
            // answers like one.
            warn!(
                "{} is set to {metadata_host} but no usable metadata proxy \
                 answered; starting a fresh session",
                gate_common::env::PROD_SESSION,
            );
            None
        }
    }
}

async fn probe_session(metadata_host: &str) -> Option<NestedSessionInfo> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .ok()?;
    let base = format!("http://{metadata_host}");

    // 1. Presence: 2xx on the root, with the flavor response header.
    let ping = client.get(&base).send().await.ok()?;
    if !ping.status().is_success() {
        return None;
    }
    let flavor = ping.headers().get(FLAVOR_HEADER)?;
    if flavor.as_bytes() != FLAVOR_VALUE.as_bytes() {
        return None;
    }

    // 2. A live token with time left on it.
    let token: serde_json::Value = client
        .get(format!(
            "{base}/computeMetadata/v1/instance/service-accounts/default/token"
        ))
        .header(FLAVOR_HEADER, FLAVOR_VALUE)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .json()
        .await
        .ok()?;
    if token.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(0) <= 0 {
        return None;
    }

    // 3. The advertised identity and project.
    let email = read_text(
        &client,
        &format!(
            "{base}/computeMetadata/v1/instance/service-accounts/default/email"
        ),
    )
    .await?;
    let project_id = read_text(
        &client,
        &format!("{base}/computeMetadata/v1/project/project-id"),
    )
    .await?;

    debug!(
        "found reusable prod session at {metadata_host} \
         (account {email}, project {project_id})"
    );
    Some(NestedSessionInfo {
        metadata_host: metadata_host.to_owned(),
        email,
        project_id,
    })
}

/// GET a text endpoint with the flavor header; `None` on any failure or an
/// empty (whitespace-only) body.
async fn read_text(client: &reqwest::Client, url: &str) -> Option<String> {
    let body = client
        .get(url)
        .header(FLAVOR_HEADER, FLAVOR_VALUE)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .text()
        .await
        .ok()?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_owned())
}
