use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use argh::FromArgs;
use gate_api::client::GateClient;
use gate_common::{env, rundir, scopes, shutdown::ShutdownChannel};
use tracing::warn;

use crate::{
    deps::ProxyDeps,
    listener::{self, AncestryCheck},
    providers::{GateProjectNumber, GateProviders, GateUniverseDomain},
};

/// The container-side metadata proxy. Emulates the cloud provider's
/// instance-metadata API on loopback TCP, forwarding token requests to the
/// gate daemon's Unix socket.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// TCP port to bind on 127.0.0.1; 0 picks an ephemeral port.
    /// Defaults to 8173
    #[argh(option, default = "8173")]
    pub port: u16,

    /// path of the gate Unix socket.
    /// Defaults to `<runtime_dir>/gated.sock`
    #[argh(option)]
    pub gate_socket: Option<PathBuf>,

    /// the project id to advertise.
    /// Defaults to $CLOUDSDK_CORE_PROJECT
    #[argh(option)]
    pub project: Option<String>,

    /// comma-joined scopes requested for tokens.
    /// Defaults to the cloud-platform scope
    #[argh(option)]
    pub scopes: Option<String>,

    /// only accept connections from descendants of this PID
    #[argh(option)]
    pub allowed_ancestor_pid: Option<u32>,
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
        let project_id = self
            .project
            .or_else(|| std::env::var(env::CLOUDSDK_CORE_PROJECT).ok())
            .context(
                "No project configured: pass --project or set \
                 CLOUDSDK_CORE_PROJECT",
            )?;

        let gate_socket = match self.gate_socket {
            Some(path) => path,
            None => rundir::gate_socket_path()?,
        };
        GateClient::check_gate_socket(&gate_socket).await?;
        let client = Arc::new(GateClient::new(&gate_socket));

        let scope_list = self
            .scopes
            .as_deref()
            .map(scopes::parse_scopes_param)
            .filter(|scope_list| !scope_list.is_empty())
            .unwrap_or_else(|| vec![scopes::CLOUD_PLATFORM.to_owned()]);

        // Advertise the engineer's identity when the gate can name it; the
        // proxy still works without.
        let email = match client.identity_email().await {
            Ok(email) => Some(email),
            Err(err) => {
                warn!("could not resolve identity email: {err}");
                None
            }
        };

        let deps = Arc::new(ProxyDeps {
            token_provider: Arc::new(GateProviders::new(
                client.clone(),
                scope_list.clone(),
            )),
            project_number: Some(Arc::new(GateProjectNumber(client.clone()))),
            universe_domain: Some(Arc::new(GateUniverseDomain(client))),
            project_id,
            email,
            scopes: scope_list,
            started_at: Instant::now(),
        });

        let shutdown = ShutdownChannel::new();
        gate_api::server::spawn_signal_handlers(shutdown.clone())
            .context("Failed to install signal handlers")?;

        let ancestry = self.allowed_ancestor_pid.map(AncestryCheck::new);
        let proxy = listener::spawn(deps, self.port, ancestry).await?;
        tracing::info!("metadata proxy listening on {}", proxy.host());
        let mut wait_shutdown = shutdown.clone();
        wait_shutdown.recv().await;
        proxy.stop().await;
        Ok(())
    }
}
