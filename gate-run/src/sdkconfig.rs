//! The ephemeral SDK-config directory handed to the wrapped child.
//!
//! The access token travels to the child through a `0600` file referenced
//! by an SDK `properties` file, never through an environment variable. The
//! directory lives under the user-private runtime dir and is removed on
//! every exit path (the [`tempfile::TempDir`] guard also fires on panic).

use std::{
    fs,
    io::Write,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::Path,
};

use anyhow::Context;

const TOKEN_FILE: &str = "access_token";
const PROPERTIES_FILE: &str = "properties";

/// Owning guard for the temp SDK-config directory.
pub struct SdkConfigDir {
    dir: tempfile::TempDir,
}

impl SdkConfigDir {
    /// Materialize a fresh config dir under `runtime_dir` holding
    /// `access_token` and a `properties` file pointing at it.
    pub fn create(
        runtime_dir: &Path,
        access_token: &str,
    ) -> anyhow::Result<Self> {
        gate_common::rundir::ensure_private_dir(runtime_dir).with_context(
            || format!("Could not create {}", runtime_dir.display()),
        )?;

        let dir = tempfile::Builder::new()
            .prefix("sdk-config-")
            .tempdir_in(runtime_dir)
            .context("Could not create the SDK config dir")?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))
            .context("Could not chmod the SDK config dir")?;

        let token_path = dir.path().join(TOKEN_FILE);
        write_private_file(&token_path, access_token.as_bytes())
            .context("Could not write the access token file")?;

        let properties = format!(
            "[auth]\naccess_token_file = {}\n",
            token_path.display()
        );
        write_private_file(
            &dir.path().join(PROPERTIES_FILE),
            properties.as_bytes(),
        )
        .context("Could not write the SDK properties file")?;

        Ok(Self { dir })
    }

    /// The value for the child's `CLOUDSDK_CONFIG`.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, surfacing errors. Dropping the guard also
    /// removes it (best-effort) on early returns and panics.
    pub fn cleanup(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Create a `0600` file with `contents`, failing if it already exists.
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}
