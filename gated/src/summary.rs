//! Renders a wrapped command line into a short display string for the
//! confirmation dialog, redacting anything secret-shaped.

/// Max length of a rendered summary, in chars.
const MAX_SUMMARY_CHARS: usize = 80;

/// Minimum length at which a bare argument is treated as an inline secret.
const BASE64ISH_MIN_LEN: usize = 40;

/// Keywords marking a `--flag=value` as secret-bearing.
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "auth",
    "api-key",
    "private",
];

/// Parse the `X-Wrapped-Command` header value: valid JSON which is an array
/// of at least one string. Anything else means "no summary".
pub fn parse_wrapped_command(header: Option<&str>) -> Option<Vec<String>> {
    let argv: Vec<String> = serde_json::from_str(header?).ok()?;
    if argv.is_empty() {
        return None;
    }
    Some(argv)
}

/// Summarize `argv` for display: basename the program, redact secret-shaped
/// arguments, strip control characters, and truncate to 80 chars.
pub fn summarize_command(argv: &[String]) -> String {
    let mut pieces = Vec::with_capacity(argv.len());

    if let Some(program) = argv.first() {
        pieces.push(strip_control_chars(basename(program)));
    }
    for arg in argv.iter().skip(1) {
        pieces.push(strip_control_chars(&redact_arg(arg)));
    }

    let joined = pieces.join(" ");
    if joined.chars().count() <= MAX_SUMMARY_CHARS {
        return joined;
    }
    let mut truncated: String =
        joined.chars().take(MAX_SUMMARY_CHARS - 1).collect();
    truncated.push('\u{2026}');
    truncated
}

fn basename(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

fn redact_arg(arg: &str) -> String {
    if is_base64ish(arg) {
        return "***".to_owned();
    }
    if let Some(redacted) = redact_sensitive_flag(arg) {
        return redacted;
    }
    arg.to_owned()
}

/// A long run of base64/url-safe chars is almost certainly a credential.
fn is_base64ish(arg: &str) -> bool {
    arg.len() >= BASE64ISH_MIN_LEN
        && arg.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'+' | b'/' | b'=' | b'_' | b'-')
        })
}

/// `--some-key=value` or `-some-key:value` where the key names a secret:
/// keep the key and separator, replace only the value.
fn redact_sensitive_flag(arg: &str) -> Option<String> {
    let stripped = arg
        .strip_prefix("--")
        .or_else(|| arg.strip_prefix('-'))?;

    let sep_idx = stripped.find(['=', ':'])?;
    let key = &stripped[..sep_idx];
    if key.is_empty() {
        return None;
    }

    let key_lower = key.to_ascii_lowercase();
    let sensitive = SENSITIVE_KEYWORDS
        .iter()
        .any(|keyword| key_lower.contains(keyword));
    if !sensitive {
        return None;
    }

    let prefix_len = arg.len() - stripped.len() + sep_idx + 1;
    Some(format!("{}***", &arg[..prefix_len]))
}

/// Replace C0 controls and DEL with spaces so a crafted argv can't inject
/// newlines or escape sequences into the dialog.
fn strip_control_chars(piece: &str) -> String {
    piece
        .chars()
        .map(|c| {
            if c.is_ascii_control() {
                ' '
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn redacts_sensitive_flags_and_inline_secrets() {
        let blob = "A".repeat(45);
        let argv = vec![
            "/usr/bin/curl".to_owned(),
            "--password=s3cret".to_owned(),
            blob.clone(),
        ];
        let summary = summarize_command(&argv);

        assert!(summary.starts_with("curl "));
        assert!(summary.contains("--password=***"));
        assert!(summary.contains("***"));
        assert!(!summary.contains("s3cret"));
        assert!(!summary.contains(&blob));
    }

    #[test]
    fn keeps_ordinary_flags() {
        let argv = vec![
            "gsutil".to_owned(),
            "cp".to_owned(),
            "--recursive=true".to_owned(),
            "gs://bucket".to_owned(),
        ];
        assert_eq!(
            summarize_command(&argv),
            "gsutil cp --recursive=true gs://bucket"
        );
    }

    #[test]
    fn colon_separator_and_single_dash_are_covered() {
        let argv =
            vec!["tool".to_owned(), "-api-key:abc123".to_owned()];
        assert_eq!(summarize_command(&argv), "tool -api-key:***");
    }

    #[test]
    fn strips_control_chars() {
        let argv =
            vec!["echo".to_owned(), "a\nb\x1b[31mc\x7f".to_owned()];
        let summary = summarize_command(&argv);
        assert_eq!(summary, "echo a b [31mc ");
    }

    #[test]
    fn truncates_to_80_chars_with_ellipsis() {
        let argv = vec!["verylongprogramname".to_owned(), "x".repeat(100)];
        let summary = summarize_command(&argv);
        assert_eq!(summary.chars().count(), 80);
        assert!(summary.ends_with('\u{2026}'));
    }

    #[test]
    fn parse_wrapped_command_rejects_bad_headers() {
        assert_eq!(parse_wrapped_command(None), None);
        assert_eq!(parse_wrapped_command(Some("not json")), None);
        assert_eq!(parse_wrapped_command(Some("[]")), None);
        assert_eq!(parse_wrapped_command(Some("{\"a\":1}")), None);
        assert_eq!(parse_wrapped_command(Some("[1,2]")), None);
        assert_eq!(parse_wrapped_command(Some("[\"ls\",1]")), None);
        assert_eq!(
            parse_wrapped_command(Some(r#"["ls","-la"]"#)),
            Some(vec!["ls".to_owned(), "-la".to_owned()])
        );
    }

    proptest! {
        /// No secret value passed via a sensitive flag survives into the
        /// summary.
        #[test]
        fn sensitive_values_never_leak(raw in any::<u64>()) {
            // Hex can't collide with the fixed parts of the summary.
            let value = format!("{raw:016x}");
            let argv = vec![
                "deploy".to_owned(),
                format!("--password={value}"),
            ];
            let summary = summarize_command(&argv);
            prop_assert!(!summary.contains(&value));
            prop_assert!(summary.contains("--password=***"));
        }
    }
}
