//! Environment variable names shared across the gate components, plus the
//! list of credential-bearing variables the elevation wrapper strips from
//! child environments.

/// Sentinel marking a process tree as running inside an elevated session.
/// Value: `host:port` of the parent session's metadata proxy.
pub const PROD_SESSION: &str = "GCP_AUTHCALATOR_PROD_SESSION";

/// Metadata-server discovery variables honored by all known client libraries.
pub const GCE_METADATA_HOST: &str = "GCE_METADATA_HOST";
pub const GCE_METADATA_IP: &str = "GCE_METADATA_IP";

/// Cloud-SDK configuration variables.
pub const CLOUDSDK_CONFIG: &str = "CLOUDSDK_CONFIG";
pub const CLOUDSDK_CORE_ACCOUNT: &str = "CLOUDSDK_CORE_ACCOUNT";
pub const CLOUDSDK_CORE_PROJECT: &str = "CLOUDSDK_CORE_PROJECT";

/// Standard user-private runtime directory (systemd / XDG).
pub const XDG_RUNTIME_DIR: &str = "XDG_RUNTIME_DIR";

/// Credential-bearing variables stripped from every wrapped child's
/// environment, so the ephemeral metadata proxy is the child's only
/// credential channel.
pub const CREDENTIAL_VARS: &[&str] = &[
    "CLOUDSDK_AUTH_ACCESS_TOKEN",
    "CPL_GS_BEARER",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GOOGLE_OAUTH_ACCESS_TOKEN",
    "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE",
    CLOUDSDK_CORE_ACCOUNT,
    CLOUDSDK_CONFIG,
];

/// Whether `name` is one of the [`CREDENTIAL_VARS`].
pub fn is_credential_var(name: &str) -> bool {
    CREDENTIAL_VARS.contains(&name)
}

/// Drop all [`CREDENTIAL_VARS`] from an environment snapshot.
pub fn scrub_credential_vars(
    env: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    env.into_iter()
        .filter(|(name, _)| !is_credential_var(name))
        .collect()
}
