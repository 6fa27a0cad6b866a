/// The default scope requested when a caller doesn't name any.
pub const CLOUD_PLATFORM: &str =
    "https://www.googleapis.com/auth/cloud-platform";

/// Canonicalize a scope set into a cache key: sorted and comma-joined.
///
/// Two requests for the same scopes in different orders hit the same cache
/// entry.
pub fn canonical_key(scopes: &[String]) -> String {
    let mut sorted = scopes.to_vec();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Parse a comma-joined `scopes` query parameter into a scope list.
///
/// Empty segments are dropped; an empty or all-whitespace input yields an
/// empty list (callers fall back to the default scope set).
pub fn parse_scopes_param(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_owned)
        .collect()
}
