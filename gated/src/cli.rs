use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use argh::FromArgs;
use gate_common::{audit::FileAuditSink, env, rundir, shutdown::ShutdownChannel};

use crate::{
    auth::{AuthConfig, Authenticator},
    confirm::DialogConfirmer,
    identity::GcloudIdentity,
    listener,
    rate_limit::ProdRateLimiter,
    router::{self, GateDeps},
};

/// The gcp-gate host daemon. Mints dev and prod cloud access tokens over a
/// user-private Unix socket; prod requests require confirmation.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// path of the gate Unix socket.
    /// Defaults to `<runtime_dir>/gated.sock`
    #[argh(option)]
    pub socket_path: Option<PathBuf>,

    /// the cloud project id served to containers.
    /// Defaults to $CLOUDSDK_CORE_PROJECT
    #[argh(option)]
    pub project: Option<String>,

    /// the service account impersonated for dev tokens. If unset, dev tokens
    /// are minted from the caller's own credentials
    #[argh(option)]
    pub dev_service_account: Option<String>,
}

impl Args {
    pub fn run(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to build tokio runtime")?;
        rt.block_on(self.run_async())
    }

    async fn run_async(self) -> anyhow::Result<()> {
        let project = self
            .project
            .or_else(|| std::env::var(env::CLOUDSDK_CORE_PROJECT).ok())
            .context(
                "No project configured: pass --project or set \
                 CLOUDSDK_CORE_PROJECT",
            )?;

        let runtime_dir = rundir::ensure_runtime_dir()?;
        let socket_path = match self.socket_path {
            Some(path) => path,
            None => rundir::gate_socket_path()?,
        };

        if self.dev_service_account.is_none() {
            tracing::warn!(
                "no --dev-service-account configured; dev tokens will carry \
                 the caller's own identity"
            );
        }

        let identity =
            GcloudIdentity::new(self.dev_service_account);
        let auth = Authenticator::new(
            Arc::new(identity),
            AuthConfig::new(project),
        );

        let deps = Arc::new(GateDeps {
            auth,
            confirmer: Arc::new(DialogConfirmer::new()),
            audit: Arc::new(FileAuditSink::new(&runtime_dir)?),
            limiter: std::sync::Mutex::new(ProdRateLimiter::default()),
            started_at: Instant::now(),
        });

        let shutdown = ShutdownChannel::new();
        gate_api::server::spawn_signal_handlers(shutdown.clone())
            .context("Failed to install signal handlers")?;

        listener::run(&socket_path, router::router(deps), shutdown).await
    }
}
