//! End-to-end tests: a gate daemon served on a real Unix socket, driven
//! through the `GateClient`, with a scripted confirmer and identity fakes.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use axum::{Json, Router, routing};
use gate_api::client::{GateClient, GateClientError};
use gate_common::{
    audit::{AuditLevel, AuditResult, MemAuditSink},
    shutdown::ShutdownChannel,
};
use gated::{
    auth::{AuthConfig, Authenticator},
    confirm::Confirmer,
    identity::{IdentityClient, RawToken},
    rate_limit::ProdRateLimiter,
    router::{self, GateDeps},
};
use http::StatusCode;

// --- Fakes --- //

struct FakeIdentity {
    mints: AtomicU32,
}

impl FakeIdentity {
    fn new() -> Self {
        Self {
            mints: AtomicU32::new(0),
        }
    }

    fn mint(&self, prefix: &str) -> Option<RawToken> {
        let count = self.mints.fetch_add(1, Ordering::SeqCst);
        Some(RawToken {
            access_token: format!("{prefix}-{count}"),
            expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
        })
    }
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn impersonated_token(
        &self,
        _scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>> {
        Ok(self.mint("dev-token"))
    }

    async fn user_token(
        &self,
        _scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>> {
        Ok(self.mint("prod-token"))
    }

    async fn universe_domain(&self) -> anyhow::Result<String> {
        Ok("googleapis.com".to_owned())
    }
}

#[derive(Clone, Copy, Debug)]
enum ConfirmBehavior {
    Approve,
    Deny,
    /// Park until the test releases the semaphore, then approve.
    HoldThenApprove,
}

struct ScriptedConfirmer {
    behavior: Mutex<ConfirmBehavior>,
    invocations: AtomicU32,
    hold: Arc<tokio::sync::Semaphore>,
    last_summary: Mutex<Option<Option<String>>>,
}

impl ScriptedConfirmer {
    fn new(behavior: ConfirmBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            invocations: AtomicU32::new(0),
            hold: Arc::new(tokio::sync::Semaphore::new(0)),
            last_summary: Mutex::new(None),
        }
    }

    fn set_behavior(&self, behavior: ConfirmBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm_prod_access(
        &self,
        _email: &str,
        command_summary: Option<&str>,
    ) -> anyhow::Result<bool> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_summary.lock().unwrap() =
            Some(command_summary.map(str::to_owned));

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            ConfirmBehavior::Approve => Ok(true),
            ConfirmBehavior::Deny => Ok(false),
            ConfirmBehavior::HoldThenApprove => {
                let _permit = self.hold.acquire().await?;
                Ok(true)
            }
        }
    }
}

// --- Harness --- //

struct Gate {
    client: GateClient,
    confirmer: Arc<ScriptedConfirmer>,
    audit: Arc<MemAuditSink>,
    shutdown: ShutdownChannel,
    _tmp: tempfile::TempDir,
}

/// Serve a fake provider (tokeninfo + project lookup) on loopback TCP.
async fn spawn_fake_provider() -> String {
    let provider = Router::new()
        .route(
            "/tokeninfo",
            routing::get(|| async {
                Json(serde_json::json!({ "email": "eng@ex.com" }))
            }),
        )
        .route(
            "/projects/{id}",
            routing::get(|| async {
                Json(serde_json::json!({ "name": "projects/123456" }))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, provider).await.unwrap();
    });
    format!("http://{addr}")
}

async fn start_gate(behavior: ConfirmBehavior) -> Gate {
    let provider_url = spawn_fake_provider().await;

    let mut config = AuthConfig::new("test-project".to_owned());
    config.tokeninfo_url = format!("{provider_url}/tokeninfo");
    config.project_lookup_url = format!("{provider_url}/projects");

    let auth = Authenticator::new(Arc::new(FakeIdentity::new()), config);
    let confirmer = Arc::new(ScriptedConfirmer::new(behavior));
    let audit = Arc::new(MemAuditSink::new());

    let deps = Arc::new(GateDeps {
        auth,
        confirmer: confirmer.clone(),
        audit: audit.clone(),
        limiter: Mutex::new(ProdRateLimiter::default()),
        started_at: Instant::now(),
    });

    let tmp = tempfile::tempdir().unwrap();
    let socket_path: PathBuf = tmp.path().join("gated.sock");
    let shutdown = ShutdownChannel::new();
    tokio::spawn({
        let socket_path = socket_path.clone();
        let shutdown = shutdown.clone();
        let router = router::router(deps);
        async move {
            gated::listener::run(&socket_path, router, shutdown)
                .await
                .unwrap()
        }
    });

    // Wait until the daemon answers.
    for _ in 0..200 {
        if GateClient::check_gate_socket(&socket_path).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Gate {
        client: GateClient::new(&socket_path),
        confirmer,
        audit,
        shutdown,
        _tmp: tmp,
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// --- Scenarios --- //

#[tokio::test]
async fn s1_dev_token_happy_path() {
    let gate = start_gate(ConfirmBehavior::Approve).await;

    let token = gate.client.get_token(None).await.unwrap();
    assert_eq!(token.access_token, "dev-token-0");

    let expires_in = token
        .expires_at
        .duration_since(SystemTime::now())
        .unwrap()
        .as_secs();
    assert!((3500..=3600).contains(&expires_in));

    let records = gate.audit.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].endpoint, "/token");
    assert_eq!(records[0].level, AuditLevel::Dev);
    assert_eq!(records[0].result, AuditResult::Granted);

    // No dialog for dev tokens.
    assert_eq!(gate.confirmer.invocations(), 0);
    gate.shutdown.send();
}

#[tokio::test]
async fn s2_prod_denied_by_user() {
    let gate = start_gate(ConfirmBehavior::Deny).await;

    let err = gate
        .client
        .get_prod_token(&argv(&["gsutil", "rm", "-r", "gs://prod"]))
        .await
        .unwrap_err();
    match err {
        GateClientError::Status {
            status, message, ..
        } => {
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert!(message.contains("denied"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let records = gate.audit.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, AuditLevel::Prod);
    assert_eq!(records[0].result, AuditResult::Denied);
    assert_eq!(records[0].email.as_deref(), Some("eng@ex.com"));

    // The dialog saw the summarized command.
    let summary = gate.confirmer.last_summary.lock().unwrap().clone();
    assert_eq!(summary, Some(Some("gsutil rm -r gs://prod".to_owned())));
    gate.shutdown.send();
}

#[tokio::test]
async fn s3_concurrent_prod_second_request_blocked() {
    let gate = start_gate(ConfirmBehavior::HoldThenApprove).await;
    let socket_path = gate.client.socket_path().to_owned();

    // First request parks inside the confirmation.
    let first = tokio::spawn(async move {
        GateClient::new(&socket_path)
            .get_prod_token(&argv(&["terraform", "apply"]))
            .await
    });
    for _ in 0..200 {
        if gate.confirmer.invocations() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(gate.confirmer.invocations(), 1);

    // Second request is refused instantly, without a second dialog.
    let err = gate
        .client
        .get_prod_token(&argv(&["terraform", "destroy"]))
        .await
        .unwrap_err();
    match err {
        GateClientError::Status {
            status, message, ..
        } => {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert!(
                message.contains("already pending"),
                "message: {message}"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gate.confirmer.invocations(), 1);

    // Release the dialog; the first request completes with a token.
    gate.confirmer.hold.add_permits(1);
    let token = first.await.unwrap().unwrap();
    assert!(token.access_token.starts_with("prod-token-"));

    let results: Vec<AuditResult> = gate
        .audit
        .snapshot()
        .into_iter()
        .map(|record| record.result)
        .collect();
    assert_eq!(
        results,
        vec![AuditResult::RateLimited, AuditResult::Granted]
    );
    gate.shutdown.send();
}

#[tokio::test]
async fn s4_cooldown_after_denial() {
    let gate = start_gate(ConfirmBehavior::Deny).await;

    let _ = gate
        .client
        .get_prod_token(&argv(&["kubectl", "delete", "ns", "prod"]))
        .await
        .unwrap_err();
    assert_eq!(gate.confirmer.invocations(), 1);

    // Within the 5s cooldown: refused without consulting the confirmer.
    gate.confirmer.set_behavior(ConfirmBehavior::Approve);
    let err = gate
        .client
        .get_prod_token(&argv(&["kubectl", "get", "pods"]))
        .await
        .unwrap_err();
    match err {
        GateClientError::Status {
            status, message, ..
        } => {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert!(message.contains("retry in"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gate.confirmer.invocations(), 1);

    let results: Vec<AuditResult> = gate
        .audit
        .snapshot()
        .into_iter()
        .map(|record| record.result)
        .collect();
    assert_eq!(
        results,
        vec![AuditResult::Denied, AuditResult::RateLimited]
    );
    gate.shutdown.send();
}

#[tokio::test]
async fn identity_and_project_number_endpoints() {
    let gate = start_gate(ConfirmBehavior::Approve).await;

    assert_eq!(gate.client.identity_email().await.unwrap(), "eng@ex.com");
    assert_eq!(
        gate.client.numeric_project_id().await.unwrap(),
        "123456"
    );
    assert_eq!(
        gate.client.universe_domain().await.unwrap(),
        "googleapis.com"
    );

    let health = gate.client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert!(health.uptime_seconds >= 1);
    gate.shutdown.send();
}
