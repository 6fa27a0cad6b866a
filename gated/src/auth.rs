//! The auth module: produces tokens and identity metadata by delegating to
//! the identity library, with per-scope dev-token caches and daemon-lifetime
//! identity caches.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use gate_common::{
    scopes,
    token::{CachedToken, DEFAULT_TOKEN_LIFETIME, ScopedTokenCache},
};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::identity::IdentityClient;

/// Deadline for the provider's introspection / project-lookup endpoints.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity library completed but produced no usable token.
    #[error("the identity library returned no access token")]
    NoToken,

    /// The identity library or a secondary provider endpoint failed.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The caller's identity could not be resolved.
    #[error("identity lookup failed: {0}")]
    Identity(String),
}

/// Endpoints and identifiers the auth module needs; the URLs are injectable
/// so tests can point them at a local server.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The project whose numeric id `/project-number` reports.
    pub project_id: String,
    /// Token-introspection endpoint; `?access_token=` is appended.
    pub tokeninfo_url: String,
    /// Project-lookup base; `/<project_id>` is appended.
    pub project_lookup_url: String,
}

impl AuthConfig {
    pub fn new(project_id: String) -> Self {
        Self {
            project_id,
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo"
                .to_owned(),
            project_lookup_url:
                "https://cloudresourcemanager.googleapis.com/v3/projects"
                    .to_owned(),
        }
    }
}

pub struct Authenticator {
    identity: Arc<dyn IdentityClient>,
    config: AuthConfig,
    http: reqwest::Client,
    /// Per-scope dev tokens, keyed by canonical (sorted, comma-joined) key.
    dev_tokens: ScopedTokenCache,
    /// Single-entry caches, filled once per daemon lifetime.
    email: OnceCell<String>,
    project_number: OnceCell<String>,
    universe_domain: OnceCell<String>,
}

impl Authenticator {
    pub fn new(identity: Arc<dyn IdentityClient>, config: AuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .expect("Failed to build reqwest Client");
        Self {
            identity,
            config,
            http,
            dev_tokens: ScopedTokenCache::new(),
            email: OnceCell::new(),
            project_number: OnceCell::new(),
            universe_domain: OnceCell::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Mint (or return a cached) impersonated dev token for `scopes`.
    ///
    /// An empty scope list selects the default cloud-platform scope.
    pub async fn mint_dev_token(
        &self,
        requested_scopes: &[String],
    ) -> Result<CachedToken, AuthError> {
        let scope_list = effective_scopes(requested_scopes);
        let scope_key = scopes::canonical_key(&scope_list);

        let now = SystemTime::now();
        if let Some(cached) = self.dev_tokens.get(&scope_key, now) {
            return Ok(cached);
        }

        let raw = self
            .identity
            .impersonated_token(&scope_list)
            .await
            .map_err(|err| AuthError::Upstream(format!("{err:#}")))?
            .ok_or(AuthError::NoToken)?;

        let token = CachedToken {
            access_token: raw.access_token,
            expires_at: raw
                .expires_at
                .unwrap_or(now + DEFAULT_TOKEN_LIFETIME),
        };
        // Publish before returning so concurrent requests see the mint.
        self.dev_tokens.put(scope_key, token.clone());
        Ok(token)
    }

    /// Mint a prod token from the caller's own credentials. Never cached.
    pub async fn mint_prod_token(
        &self,
        requested_scopes: &[String],
    ) -> Result<CachedToken, AuthError> {
        let scope_list = effective_scopes(requested_scopes);
        let now = SystemTime::now();

        let raw = self
            .identity
            .user_token(&scope_list)
            .await
            .map_err(|err| AuthError::Upstream(format!("{err:#}")))?
            .ok_or(AuthError::NoToken)?;

        Ok(CachedToken {
            access_token: raw.access_token,
            expires_at: raw
                .expires_at
                .unwrap_or(now + DEFAULT_TOKEN_LIFETIME),
        })
    }

    /// The email behind the caller's own credentials, via the provider's
    /// token-introspection endpoint. Cached for the daemon lifetime.
    pub async fn identity_email(&self) -> Result<String, AuthError> {
        self.email
            .get_or_try_init(|| self.lookup_email())
            .await
            .cloned()
    }

    async fn lookup_email(&self) -> Result<String, AuthError> {
        let token = self
            .identity
            .user_token(&effective_scopes(&[]))
            .await
            .map_err(|err| AuthError::Identity(format!("{err:#}")))?
            .ok_or_else(|| {
                AuthError::Identity(
                    "no token available for introspection".to_owned(),
                )
            })?;

        let response = self
            .http
            .get(&self.config.tokeninfo_url)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await
            .map_err(|err| AuthError::Identity(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Identity(format!(
                "token introspection returned {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AuthError::Identity(err.to_string()))?;
        body.get("email")
            .and_then(|email| email.as_str())
            .filter(|email| !email.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                AuthError::Identity(
                    "token introspection response had no email".to_owned(),
                )
            })
    }

    /// The project's numeric id, via the provider's project-lookup endpoint.
    /// Cached permanently.
    pub async fn project_number(&self) -> Result<String, AuthError> {
        self.project_number
            .get_or_try_init(|| self.lookup_project_number())
            .await
            .cloned()
    }

    async fn lookup_project_number(&self) -> Result<String, AuthError> {
        let token = self
            .identity
            .user_token(&effective_scopes(&[]))
            .await
            .map_err(|err| AuthError::Upstream(format!("{err:#}")))?
            .ok_or(AuthError::NoToken)?;

        let url = format!(
            "{}/{}",
            self.config.project_lookup_url, self.config.project_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|err| AuthError::Upstream(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "project lookup returned {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AuthError::Upstream(err.to_string()))?;

        // The lookup returns a resource name like "projects/123456".
        body.get("name")
            .and_then(|name| name.as_str())
            .and_then(|name| name.strip_prefix("projects/"))
            .filter(|number| {
                !number.is_empty()
                    && number.bytes().all(|b| b.is_ascii_digit())
            })
            .map(str::to_owned)
            .ok_or_else(|| {
                AuthError::Upstream(
                    "project lookup response had no projects/<number> name"
                        .to_owned(),
                )
            })
    }

    /// The universe domain of the underlying credentials. Cached permanently.
    pub async fn universe_domain(&self) -> Result<String, AuthError> {
        self.universe_domain
            .get_or_try_init(|| async {
                self.identity
                    .universe_domain()
                    .await
                    .map_err(|err| AuthError::Upstream(format!("{err:#}")))
            })
            .await
            .cloned()
    }
}

fn effective_scopes(requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        vec![scopes::CLOUD_PLATFORM.to_owned()]
    } else {
        requested.to_vec()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::identity::RawToken;

    /// An [`IdentityClient`] fake with counters and switchable failure.
    pub(crate) struct FakeIdentity {
        pub dev_mints: AtomicU32,
        pub prod_mints: AtomicU32,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl FakeIdentity {
        pub(crate) fn new() -> Self {
            Self {
                dev_mints: AtomicU32::new(0),
                prod_mints: AtomicU32::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn token(&self, prefix: &str, count: u32) -> Option<RawToken> {
            Some(RawToken {
                access_token: format!("{prefix}-{count}"),
                expires_at: Some(
                    SystemTime::now() + Duration::from_secs(3600),
                ),
            })
        }
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn impersonated_token(
            &self,
            _scopes: &[String],
        ) -> anyhow::Result<Option<RawToken>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("identity library unavailable");
            }
            let count = self.dev_mints.fetch_add(1, Ordering::SeqCst);
            Ok(self.token("dev-token", count))
        }

        async fn user_token(
            &self,
            _scopes: &[String],
        ) -> anyhow::Result<Option<RawToken>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("identity library unavailable");
            }
            let count = self.prod_mints.fetch_add(1, Ordering::SeqCst);
            Ok(self.token("prod-token", count))
        }

        async fn universe_domain(&self) -> anyhow::Result<String> {
            Ok("googleapis.com".to_owned())
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::{test_utils::FakeIdentity, *};

    fn authenticator(identity: Arc<FakeIdentity>) -> Authenticator {
        Authenticator::new(identity, AuthConfig::new("proj".to_owned()))
    }

    #[tokio::test]
    async fn dev_tokens_cached_per_scope_set() {
        let identity = Arc::new(FakeIdentity::new());
        let auth = authenticator(identity.clone());

        let a = auth.mint_dev_token(&[]).await.unwrap();
        let b = auth.mint_dev_token(&[]).await.unwrap();
        assert_eq!(a.access_token, b.access_token);
        assert_eq!(identity.dev_mints.load(Ordering::SeqCst), 1);

        // A different scope set gets its own entry.
        let scoped = auth
            .mint_dev_token(&["https://example.com/auth/storage".to_owned()])
            .await
            .unwrap();
        assert_ne!(scoped.access_token, a.access_token);
        assert_eq!(identity.dev_mints.load(Ordering::SeqCst), 2);

        // Scope order doesn't matter for the cache key.
        let ab = vec!["a".to_owned(), "b".to_owned()];
        let ba = vec!["b".to_owned(), "a".to_owned()];
        let first = auth.mint_dev_token(&ab).await.unwrap();
        let second = auth.mint_dev_token(&ba).await.unwrap();
        assert_eq!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn prod_tokens_never_cached() {
        let identity = Arc::new(FakeIdentity::new());
        let auth = authenticator(identity.clone());

        let a = auth.mint_prod_token(&[]).await.unwrap();
        let b = auth.mint_prod_token(&[]).await.unwrap();
        assert_ne!(a.access_token, b.access_token);
        assert_eq!(identity.prod_mints.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_auth_error() {
        let identity = Arc::new(FakeIdentity::new());
        identity.fail.store(true, Ordering::SeqCst);
        let auth = authenticator(identity);

        let err = auth.mint_dev_token(&[]).await.unwrap_err();
        assert!(matches!(err, AuthError::Upstream(_)));
        let err = auth.mint_prod_token(&[]).await.unwrap_err();
        assert!(matches!(err, AuthError::Upstream(_)));
    }
}
