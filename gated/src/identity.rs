//! The narrow capability the gate consumes from the cloud-SDK identity
//! stack: mint a token (impersonated or the caller's own) and report the
//! universe domain. OAuth mechanics live behind this trait; the shipped
//! implementation shells out to the SDK's CLI.

use std::{fmt, time::SystemTime};

use async_trait::async_trait;

/// A freshly minted token as reported by the identity library.
///
/// `expires_at` is `None` when the library didn't report an expiry; callers
/// fall back to a default lifetime.
#[derive(Clone)]
pub struct RawToken {
    pub access_token: String,
    pub expires_at: Option<SystemTime>,
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawToken")
            .field("access_token", &"..") // don't log tokens
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The identity-library capability consumed by the auth module.
///
/// Returning `Ok(None)` means the library completed without producing a
/// token; the auth module maps that to an upstream error.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Mint a short-lived impersonated token (the dev tier).
    async fn impersonated_token(
        &self,
        scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>>;

    /// Mint a token from the caller's own ambient credentials (the prod
    /// tier).
    async fn user_token(
        &self,
        scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>>;

    /// The universe domain of the underlying credentials.
    async fn universe_domain(&self) -> anyhow::Result<String>;
}

/// [`IdentityClient`] backed by the `gcloud` CLI.
///
/// Dev tokens impersonate `dev_service_account` when one is configured;
/// otherwise they fall back to the caller's own credentials (the daemon
/// warns about this at startup).
pub struct GcloudIdentity {
    dev_service_account: Option<String>,
}

impl GcloudIdentity {
    pub fn new(dev_service_account: Option<String>) -> Self {
        Self {
            dev_service_account,
        }
    }

    async fn print_access_token(
        &self,
        impersonate: Option<&str>,
    ) -> anyhow::Result<Option<RawToken>> {
        let mut cmd = tokio::process::Command::new("gcloud");
        cmd.arg("auth").arg("print-access-token");
        if let Some(service_account) = impersonate {
            cmd.arg(format!(
                "--impersonate-service-account={service_account}"
            ));
        }
        cmd.stdin(std::process::Stdio::null());

        let output = cmd.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "gcloud auth print-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let access_token =
            String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if access_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(RawToken {
            access_token,
            // gcloud doesn't report the expiry; callers assume the default
            // one-hour lifetime.
            expires_at: None,
        }))
    }
}

#[async_trait]
impl IdentityClient for GcloudIdentity {
    async fn impersonated_token(
        &self,
        _scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>> {
        self.print_access_token(self.dev_service_account.as_deref())
            .await
    }

    async fn user_token(
        &self,
        _scopes: &[String],
    ) -> anyhow::Result<Option<RawToken>> {
        self.print_access_token(None).await
    }

    async fn universe_domain(&self) -> anyhow::Result<String> {
        let output = tokio::process::Command::new("gcloud")
            .args(["config", "get-value", "core/universe_domain"])
            .stdin(std::process::Stdio::null())
            .output()
            .await?;

        let domain =
            String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !output.status.success() || domain.is_empty() || domain == "(unset)"
        {
            // The overwhelmingly common case; gcloud only reports a value
            // for TPC universes.
            return Ok("googleapis.com".to_owned());
        }
        Ok(domain)
    }
}
