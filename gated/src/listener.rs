//! The gate's Unix socket lifecycle: owner-verified stale-socket cleanup,
//! `0600` permissions, and inode-checked removal on shutdown.

use std::{
    fs,
    os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt},
    path::Path,
    time::Duration,
};

use anyhow::{Context, bail};
use axum::Router;
use gate_common::{rundir, shutdown::ShutdownChannel};
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Deadline for the startup probe deciding whether an existing socket
/// belongs to a live instance.
const STALE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bind the gate socket, serve `router` until `shutdown`, then clean up.
pub async fn run(
    socket_path: &Path,
    router: Router,
    shutdown: ShutdownChannel,
) -> anyhow::Result<()> {
    if let Some(parent) = socket_path.parent() {
        rundir::ensure_private_dir(parent).with_context(|| {
            format!("Could not create socket dir {}", parent.display())
        })?;
    }

    preflight(socket_path).await?;

    let listener = UnixListener::bind(socket_path).with_context(|| {
        format!("Could not bind gate socket {}", socket_path.display())
    })?;
    // Tighten before the first accept: the bind itself honors the umask.
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
        .context("Could not chmod the gate socket to 0600")?;

    // Remember which socket file is ours. If someone replaces the file while
    // we run, shutdown leaves the replacement alone.
    let created_inode = fs::metadata(socket_path)
        .context("Could not stat the bound gate socket")?
        .ino();

    info!("gate daemon listening on {}", socket_path.display());
    gate_api::server::serve_unix(listener, router, shutdown).await;

    remove_if_ours(socket_path, created_inode);
    Ok(())
}

/// Validate (and possibly clear) a pre-existing socket path.
///
/// Fatal: the path is a symlink, not a socket, owned by another user, or a
/// live instance still answers on it. A dead leftover socket is unlinked.
async fn preflight(socket_path: &Path) -> anyhow::Result<()> {
    let metadata = match fs::symlink_metadata(socket_path) {
        // Nothing there; the common case.
        Err(_) => return Ok(()),
        Ok(metadata) => metadata,
    };

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        bail!(
            "refusing to reuse {}: it is a symlink",
            socket_path.display()
        );
    }
    if !file_type.is_socket() {
        bail!(
            "refusing to reuse {}: it exists but is not a socket",
            socket_path.display()
        );
    }

    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if metadata.uid() != euid {
        bail!(
            "refusing to reuse {}: owned by uid {}, not the current user \
             (uid {euid})",
            socket_path.display(),
            metadata.uid(),
        );
    }

    let probe =
        gate_api::uds::get(socket_path, "/health", &[], STALE_PROBE_TIMEOUT)
            .await;
    if probe.is_ok_and(|resp| resp.is_success()) {
        bail!(
            "another gate daemon instance is already running on {}",
            socket_path.display()
        );
    }

    warn!("removing stale gate socket {}", socket_path.display());
    fs::remove_file(socket_path).with_context(|| {
        format!("Could not remove stale socket {}", socket_path.display())
    })
}

/// Remove the socket file iff it is still the one we created (same inode,
/// not a symlink). Errors are ignored; this runs on every shutdown path.
fn remove_if_ours(socket_path: &Path, created_inode: u64) {
    let Ok(metadata) = fs::symlink_metadata(socket_path) else {
        return;
    };
    if metadata.file_type().is_symlink() {
        return;
    }
    if metadata.ino() != created_inode {
        warn!(
            "gate socket {} was replaced while running; leaving it alone",
            socket_path.display()
        );
        return;
    }
    let _ = fs::remove_file(socket_path);
}
