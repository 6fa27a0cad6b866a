//! Common logger configuration for the gcp-gate services.
//!
//! The daemon (`gated`) and standalone proxy log to stdout. The elevation
//! wrapper (`gate-run`) logs to stderr so the wrapped child owns stdout.

use std::io::IsTerminal;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Initialize a global `tracing` logger which prints to stdout.
///
/// + The default log level includes INFO, WARN, and ERROR events.
/// + You can change the log level or module filtering with an appropriate
///   `RUST_LOG` env var set. Read more about the syntax here:
///   <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>
///
/// Panics if a logger is already initialized.
pub fn init() {
    try_init(Output::Stdout).expect("Failed to setup logger");
}

/// Initialize a global `tracing` logger which prints to stderr.
///
/// Used by `gate-run`, whose stdout belongs to the wrapped command.
pub fn init_stderr() {
    try_init(Output::Stderr).expect("Failed to setup logger");
}

/// Use this to initialize the global logger in tests.
pub fn init_for_testing() {
    // Quickly skip logger setup if no env var set.
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }

    // Don't panic if there's already a logger setup. Multiple tests might try
    // setting the global logger.
    let _ = try_init(Output::Stdout);
}

enum Output {
    Stdout,
    Stderr,
}

/// Try to initialize a global logger. Will return an `Err` if there is another
/// global logger already set.
fn try_init(output: Output) -> Result<(), TryInitError> {
    // Defaults to INFO logs if no `RUST_LOG` env var is set or we can't parse
    // the targets filter.
    let rust_log_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true);

    // Only color the output when it actually goes to a terminal; the wrapper's
    // stderr often ends up in CI logs or another process's pipe.
    let fmt_layer = match output {
        Output::Stdout => fmt_layer
            .with_ansi(std::io::stdout().is_terminal())
            .boxed(),
        Output::Stderr => fmt_layer
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(rust_log_filter))
        .try_init()
}
