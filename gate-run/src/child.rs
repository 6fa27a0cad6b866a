//! Child environment construction, spawning, signal forwarding, and exit
//! code propagation.

use std::path::Path;

use anyhow::Context;
use gate_common::env;
use tokio::signal::unix::{SignalKind, signal};
use tracing::debug;

use crate::nested::NestedSessionInfo;

/// Child env for the nested fast path: scrub credentials, point the child
/// at the parent session's proxy, keep the parent's `CLOUDSDK_CONFIG` and
/// the sentinel as-is.
pub fn nested_child_env(
    parent_env: impl IntoIterator<Item = (String, String)>,
    session: &NestedSessionInfo,
) -> Vec<(String, String)> {
    let parent_env: Vec<(String, String)> = parent_env.into_iter().collect();

    // The scrub list includes CLOUDSDK_CONFIG, but a nested child should
    // keep using the parent wrapper's config dir.
    let parent_sdk_config = lookup(&parent_env, env::CLOUDSDK_CONFIG);

    let mut child_env = env::scrub_credential_vars(parent_env);
    if let Some(sdk_config) = parent_sdk_config {
        set(&mut child_env, env::CLOUDSDK_CONFIG, &sdk_config);
    }
    set(&mut child_env, env::GCE_METADATA_HOST, &session.metadata_host);
    set(&mut child_env, env::GCE_METADATA_IP, &session.metadata_host);
    set(&mut child_env, env::CLOUDSDK_CORE_ACCOUNT, &session.email);
    set(&mut child_env, env::CLOUDSDK_CORE_PROJECT, &session.project_id);
    // The sentinel survives the scrub untouched; nothing to overlay.
    child_env
}

/// Child env for a fresh elevated session: scrub credentials, then overlay
/// the ephemeral proxy, the ephemeral SDK-config dir, the account, the
/// project, and the sentinel.
pub fn elevated_child_env(
    parent_env: impl IntoIterator<Item = (String, String)>,
    metadata_host: &str,
    sdk_config_dir: &Path,
    email: &str,
    project: &str,
) -> Vec<(String, String)> {
    let mut child_env =
        env::scrub_credential_vars(parent_env.into_iter().collect::<Vec<_>>());

    set(&mut child_env, env::GCE_METADATA_HOST, metadata_host);
    set(&mut child_env, env::GCE_METADATA_IP, metadata_host);
    set(
        &mut child_env,
        env::CLOUDSDK_CONFIG,
        &sdk_config_dir.display().to_string(),
    );
    set(&mut child_env, env::CLOUDSDK_CORE_ACCOUNT, email);
    set(&mut child_env, env::CLOUDSDK_CORE_PROJECT, project);
    set(&mut child_env, env::PROD_SESSION, metadata_host);
    child_env
}

fn lookup(env: &[(String, String)], name: &str) -> Option<String> {
    env.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

fn set(env: &mut Vec<(String, String)>, name: &str, value: &str) {
    env.retain(|(key, _)| key != name);
    env.push((name.to_owned(), value.to_owned()));
}

/// Spawn the wrapped command with inherited stdio and exactly `child_env`,
/// forward SIGTERM/SIGINT to it, and wait.
///
/// Returns the child's exit code; a child killed by a signal maps to 1.
pub async fn run_child(
    argv: &[String],
    child_env: Vec<(String, String)>,
) -> anyhow::Result<i32> {
    let (program, args) = argv
        .split_first()
        .context("Missing a command to run")?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .env_clear()
        .envs(child_env)
        .spawn()
        .with_context(|| format!("Could not spawn `{program}`"))?;
    let child_pid = child.id();

    // Streams are dropped (and the default dispositions effectively
    // restored) when this function returns.
    let mut sigterm = signal(SignalKind::terminate())
        .context("Could not install the SIGTERM forwarder")?;
    let mut sigint = signal(SignalKind::interrupt())
        .context("Could not install the SIGINT forwarder")?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("Could not wait on the child")?;
                debug!("wrapped command exited with {status}");
                return Ok(status.code().unwrap_or(1));
            }
            _ = sigterm.recv() => forward(child_pid, libc::SIGTERM),
            _ = sigint.recv() => forward(child_pid, libc::SIGINT),
        }
    }
}

fn forward(child_pid: Option<u32>, signum: i32) {
    let Some(pid) = child_pid else {
        // Already reaped; the wait arm will return shortly.
        return;
    };
    debug!("forwarding signal {signum} to child {pid}");
    // SAFETY: kill with a valid pid/signal has no memory-safety
    // preconditions.
    unsafe {
        libc::kill(pid as libc::pid_t, signum);
    }
}
