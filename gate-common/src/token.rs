use std::{
    collections::HashMap,
    fmt,
    sync::Mutex,
    time::{Duration, SystemTime},
};

/// The min remaining lifetime of a token before callers must re-mint.
///
/// A token within this margin of its expiry is treated as stale so that a
/// caller never hands out a token which expires mid-request.
pub const FRESHNESS_MARGIN: Duration = Duration::from_secs(5 * 60);

/// The lifetime assumed for tokens whose issuer didn't report an expiry.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// An opaque access token plus its absolute expiry instant.
#[derive(Clone, Eq, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: SystemTime,
}

impl CachedToken {
    /// Whether this token still has more than [`FRESHNESS_MARGIN`] of
    /// lifetime left at `now`. Stale tokens must be re-minted, not returned.
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now + FRESHNESS_MARGIN < self.expires_at
    }

    /// Remaining whole seconds of lifetime at `now`; 0 if already expired.
    pub fn expires_in_secs(&self, now: SystemTime) -> u64 {
        self.expires_at
            .duration_since(now)
            .map(|remaining| remaining.as_secs())
            .unwrap_or(0)
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"..") // don't log tokens
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A single-entry token cache.
///
/// `get` returns the cached entry only while it is fresh; otherwise the
/// caller must re-fetch and `put`. Never blocks on I/O, never panics.
#[derive(Debug, Default)]
pub struct TokenCell {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, now: SystemTime) -> Option<CachedToken> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().filter(|token| token.is_fresh(now)).cloned()
    }

    pub fn put(&self, token: CachedToken) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token);
    }
}

/// A token cache keyed by canonical scope key.
///
/// Used for dev tokens, which are minted per requested scope set.
#[derive(Debug, Default)]
pub struct ScopedTokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl ScopedTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope_key: &str, now: SystemTime) -> Option<CachedToken> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(scope_key)
            .filter(|token| token.is_fresh(now))
            .cloned()
    }

    pub fn put(&self, scope_key: String, token: CachedToken) {
        let mut entries =
            self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(scope_key, token);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn token_expiring_in(secs: u64) -> CachedToken {
        CachedToken {
            access_token: "ya29.test".to_owned(),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn freshness_requires_margin() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        // Expires well past the margin => fresh.
        assert!(token_expiring_in(1_000 + 301).is_fresh(now));
        // Expires exactly at now + margin => stale (strict inequality).
        assert!(!token_expiring_in(1_000 + 300).is_fresh(now));
        // Already expired => stale.
        assert!(!token_expiring_in(999).is_fresh(now));
    }

    #[test]
    fn cell_returns_only_fresh_entries() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let cell = TokenCell::new();
        assert_eq!(cell.get(now), None);

        cell.put(token_expiring_in(1_000 + 3600));
        let hit = cell.get(now).expect("fresh entry should be returned");
        // Every cache hit satisfies `expires_at - now > margin`.
        assert!(hit.expires_at > now + FRESHNESS_MARGIN);

        cell.put(token_expiring_in(1_000 + 60));
        assert_eq!(cell.get(now), None);
    }

    #[test]
    fn scoped_cache_is_per_key() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let cache = ScopedTokenCache::new();

        cache.put("a,b".to_owned(), token_expiring_in(1_000 + 3600));
        assert!(cache.get("a,b", now).is_some());
        assert!(cache.get("a", now).is_none());
    }

    #[test]
    fn expires_in_secs_floors_at_zero() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(token_expiring_in(1_000 + 90).expires_in_secs(now), 90);
        assert_eq!(token_expiring_in(900).expires_in_secs(now), 0);
    }
}
