//! Human confirmation for prod token requests.
//!
//! Policy: a GUI question dialog when one is available (`zenity` on Linux,
//! `osascript` on macOS, both defaulting to Deny), a `[y/N]` prompt when
//! stdin is a TTY, otherwise deny. Everything times out to denial after 60
//! seconds.

use std::{io::IsTerminal, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, warn};

/// Hard deadline for a confirmation decision; expiry is denial.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra slack on top of a helper's own timeout before we kill it.
const HELPER_KILL_SLACK: Duration = Duration::from_secs(5);

/// Produces a boolean approval for an `(email, command_summary)` pair.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm_prod_access(
        &self,
        email: &str,
        command_summary: Option<&str>,
    ) -> anyhow::Result<bool>;
}

/// The production [`Confirmer`].
pub struct DialogConfirmer {
    _priv: (),
}

impl DialogConfirmer {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl Default for DialogConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Confirmer for DialogConfirmer {
    async fn confirm_prod_access(
        &self,
        email: &str,
        command_summary: Option<&str>,
    ) -> anyhow::Result<bool> {
        let prompt = render_prompt(email, command_summary);

        match gui_dialog(&prompt, email, command_summary).await? {
            Some(decision) => return Ok(decision),
            // Helper binary not present; fall through to the TTY.
            None => debug!("no GUI dialog helper available"),
        }

        if std::io::stdin().is_terminal() {
            return tty_prompt(&prompt).await;
        }

        warn!("no dialog helper and stdin is not a TTY; denying prod access");
        Ok(false)
    }
}

fn render_prompt(email: &str, command_summary: Option<&str>) -> String {
    match command_summary {
        Some(summary) => format!(
            "Allow PRODUCTION cloud access for {email}?\n\nCommand: {summary}"
        ),
        None => format!("Allow PRODUCTION cloud access for {email}?"),
    }
}

/// Run the platform dialog helper. `Ok(None)` means the helper binary is
/// missing and the caller should fall through to the TTY.
#[cfg(target_os = "macos")]
async fn gui_dialog(
    _prompt: &str,
    email: &str,
    command_summary: Option<&str>,
) -> anyhow::Result<Option<bool>> {
    let script = osascript_source(email, command_summary);
    let mut cmd = tokio::process::Command::new("osascript");
    cmd.arg("-e").arg(script);

    match run_helper(cmd).await? {
        HelperResult::Missing => Ok(None),
        HelperResult::TimedOut => Ok(Some(false)),
        HelperResult::Finished(output) => Ok(Some(parse_osascript_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
        ))),
    }
}

#[cfg(not(target_os = "macos"))]
async fn gui_dialog(
    prompt: &str,
    _email: &str,
    _command_summary: Option<&str>,
) -> anyhow::Result<Option<bool>> {
    let mut cmd = tokio::process::Command::new("zenity");
    cmd.args([
        "--question",
        "--title",
        "Production cloud access",
        "--no-markup",
        "--default-cancel",
        "--timeout",
        "60",
        "--text",
        prompt,
    ]);

    match run_helper(cmd).await? {
        HelperResult::Missing => Ok(None),
        HelperResult::TimedOut => Ok(Some(false)),
        // zenity: 0 = yes, 1 = no, 5 = timeout; treat everything non-zero
        // as denial.
        HelperResult::Finished(output) =>
            Ok(Some(output.status.code() == Some(0))),
    }
}

enum HelperResult {
    /// The helper binary doesn't exist; fall through to the TTY.
    Missing,
    /// The helper overstayed the deadline and was killed.
    TimedOut,
    Finished(std::process::Output),
}

/// Spawn a dialog helper and wait for it, killing it if it overstays the
/// confirmation deadline.
async fn run_helper(
    mut cmd: tokio::process::Command,
) -> anyhow::Result<HelperResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound =>
            return Ok(HelperResult::Missing),
        Err(err) => return Err(err.into()),
    };

    let deadline = CONFIRM_TIMEOUT + HELPER_KILL_SLACK;
    match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(output) => Ok(HelperResult::Finished(output?)),
        Err(_) => {
            // kill_on_drop reaps the helper; a hung dialog is a denial.
            warn!("confirmation dialog timed out; denying");
            Ok(HelperResult::TimedOut)
        }
    }
}

/// Prompt on the controlling terminal. Anything but y/yes (or a timeout) is
/// denial.
async fn tty_prompt(prompt: &str) -> anyhow::Result<bool> {
    eprintln!("{prompt}");
    eprint!("Allow? [y/N] ");

    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    match tokio::time::timeout(CONFIRM_TIMEOUT, stdin.read_line(&mut line))
        .await
    {
        Ok(Ok(_)) => Ok(answer_is_yes(&line)),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => {
            eprintln!();
            warn!("confirmation prompt timed out; denying");
            Ok(false)
        }
    }
}

fn answer_is_yes(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    )
}

/// Build the AppleScript source for the macOS modal. Deny is the default
/// button; the dialog gives up (denies) after 60 seconds.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn osascript_source(email: &str, command_summary: Option<&str>) -> String {
    let mut text = format!(
        "Allow PRODUCTION cloud access for {}?",
        escape_applescript(email)
    );
    if let Some(summary) = command_summary {
        text.push_str("\\n\\nCommand: ");
        text.push_str(&escape_applescript(summary));
    }
    format!(
        "display dialog \"{text}\" with title \"Production cloud access\" \
         buttons {{\"Deny\", \"Allow\"}} default button \"Deny\" \
         giving up after 60"
    )
}

/// Escape a value for interpolation into a double-quoted AppleScript string.
fn escape_applescript(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `osascript` prints e.g. `button returned:Allow, gave up:false`. A timed
/// out dialog reports `gave up:true` with the default button and must count
/// as denial.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_osascript_output(success: bool, stdout: &str) -> bool {
    success
        && stdout.contains("button returned:Allow")
        && !stdout.contains("gave up:true")
}
