//! Resolution of the user-private runtime directory which holds the gate
//! socket, the audit log, and the wrapper's ephemeral SDK-config dirs.
//!
//! Prefers `$XDG_RUNTIME_DIR/gcp-gate` (tmpfs, already user-private), falling
//! back to `~/.gcp-gate` when XDG is unset. The directory is always created
//! with mode `0700`.

use std::{
    fs,
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};

use crate::env;

/// Subdirectory name under `$XDG_RUNTIME_DIR`.
const RUNTIME_SUBDIR: &str = "gcp-gate";
/// Fallback directory name under `$HOME`.
const HOME_FALLBACK_DIR: &str = ".gcp-gate";

const SOCKET_FILE: &str = "gated.sock";
const AUDIT_FILE: &str = "audit.log";

/// Resolve the runtime directory path without creating it.
pub fn runtime_dir() -> anyhow::Result<PathBuf> {
    if let Some(xdg) = std::env::var_os(env::XDG_RUNTIME_DIR)
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join(RUNTIME_SUBDIR));
    }

    let home = std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .ok_or_else(|| anyhow!("Neither XDG_RUNTIME_DIR nor HOME is set"))?;
    Ok(PathBuf::from(home).join(HOME_FALLBACK_DIR))
}

/// Resolve the runtime directory and ensure it exists with mode `0700`.
pub fn ensure_runtime_dir() -> anyhow::Result<PathBuf> {
    let dir = runtime_dir()?;
    ensure_private_dir(&dir)
        .with_context(|| format!("Could not create {}", dir.display()))?;
    Ok(dir)
}

/// Create `dir` (and parents) if needed and force its mode to `0700`.
///
/// The chmod runs even when the directory pre-exists, so a directory created
/// by an older build with looser permissions gets tightened on next start.
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

/// Default path of the gate daemon's Unix socket.
pub fn gate_socket_path() -> anyhow::Result<PathBuf> {
    Ok(runtime_dir()?.join(SOCKET_FILE))
}

/// Path of the per-user audit log.
pub fn audit_log_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(AUDIT_FILE)
}
