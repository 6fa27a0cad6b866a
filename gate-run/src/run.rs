//! The elevation pipeline: reuse an enclosing session when safe, otherwise
//! mint a prod token once and run the child against an ephemeral,
//! PID-restricted metadata proxy.

use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use gate_api::client::GateClient;
use gate_common::{env, rundir};
use gate_proxy::{
    deps::ProxyDeps,
    listener::AncestryCheck,
    providers::{
        GateProjectNumber, GateUniverseDomain, StaticTokenProvider,
    },
};
use tracing::{info, warn};

use crate::{child, nested, sdkconfig::SdkConfigDir};

pub struct RunConfig {
    pub requested_project: Option<String>,
    pub gate_socket: Option<PathBuf>,
}

/// Wrap `argv`; the returned value is the process exit code.
pub async fn run(config: RunConfig, wrapped: Vec<String>) -> i32 {
    match try_run(config, wrapped).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("gate-run error: {err:#}");
            1
        }
    }
}

async fn try_run(
    config: RunConfig,
    wrapped: Vec<String>,
) -> anyhow::Result<i32> {
    let requested_project = config
        .requested_project
        .or_else(|| std::env::var(env::CLOUDSDK_CORE_PROJECT).ok());

    // Nested fast path: inherit the enclosing elevated session instead of
    // prompting the engineer again.
    let sentinel = std::env::var(env::PROD_SESSION).ok();
    if let Some(session) = nested::detect(sentinel.as_deref()).await {
        if nested::should_reuse(&session, requested_project.as_deref()) {
            info!(
                "reusing existing prod session at {} (account {})",
                session.metadata_host, session.email
            );
            let child_env =
                child::nested_child_env(std::env::vars(), &session);
            return child::run_child(&wrapped, child_env).await;
        }
        info!(
            "enclosing prod session serves project {}, but {} was \
             requested; starting a fresh session",
            session.project_id,
            requested_project.as_deref().unwrap_or("<none>"),
        );
    }

    let project = requested_project.context(
        "No project configured: pass --project or set CLOUDSDK_CORE_PROJECT",
    )?;

    // One prod token for the whole session, minted before anything else so
    // a denial costs nothing to clean up.
    let gate_socket = match config.gate_socket {
        Some(path) => path,
        None => rundir::gate_socket_path()?,
    };
    GateClient::check_gate_socket(&gate_socket).await?;
    let client = Arc::new(GateClient::new(&gate_socket));

    let token = client
        .get_prod_token(&wrapped)
        .await
        .context("Could not acquire a production token")?;
    let email = client
        .identity_email()
        .await
        .context("Could not resolve the caller's identity")?;

    // The ephemeral proxy: static token, restricted to our process tree,
    // lifecycle owned by us (no signal handlers of its own).
    let deps = Arc::new(ProxyDeps {
        token_provider: Arc::new(StaticTokenProvider::new(token.clone())),
        project_number: Some(Arc::new(GateProjectNumber(client.clone()))),
        universe_domain: Some(Arc::new(GateUniverseDomain(client.clone()))),
        project_id: project.clone(),
        email: Some(email.clone()),
        scopes: vec![gate_common::scopes::CLOUD_PLATFORM.to_owned()],
        started_at: Instant::now(),
    });
    let proxy = gate_proxy::listener::spawn(
        deps,
        0,
        Some(AncestryCheck::new(std::process::id())),
    )
    .await
    .context("Could not start the ephemeral metadata proxy")?;
    let metadata_host = proxy.host();

    let runtime_dir = rundir::ensure_runtime_dir()?;
    let sdk_config = match SdkConfigDir::create(&runtime_dir, &token.access_token)
    {
        Ok(sdk_config) => sdk_config,
        Err(err) => {
            proxy.stop().await;
            return Err(err);
        }
    };

    info!(
        "elevated session ready: proxy {metadata_host}, account {email}, \
         project {project}"
    );
    let child_env = child::elevated_child_env(
        std::env::vars(),
        &metadata_host,
        sdk_config.path(),
        &email,
        &project,
    );
    let child_result = child::run_child(&wrapped, child_env).await;

    // Cleanup runs on every path; the SdkConfigDir guard also fires on
    // panics.
    proxy.stop().await;
    if let Err(err) = sdk_config.cleanup() {
        warn!("could not remove the SDK config dir: {err}");
    }

    child_result
}
