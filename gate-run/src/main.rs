use std::path::PathBuf;

use argh::{EarlyExit, FromArgs, TopLevelCommand};

mod child;
mod nested;
mod run;
mod sdkconfig;

#[derive(Debug)]
pub struct Args {
    pub opts: Options,
    pub wrapped: Vec<String>,
}

/// Run a command with elevated (production) cloud credentials.
///
/// Pass the wrapped command after a `--` separator, like
/// `gate-run -- terraform apply`.
///
/// NOTE: the child never receives the raw token via argv or env; it reads
/// it through the ephemeral metadata proxy or the SDK config dir.
#[derive(Debug, FromArgs)]
pub struct Options {
    /// the cloud project for the elevated session.
    /// Defaults to $CLOUDSDK_CORE_PROJECT
    #[argh(option)]
    pub project: Option<String>,

    /// path of the gate Unix socket.
    /// Defaults to `<runtime_dir>/gated.sock`
    #[argh(option)]
    pub gate_socket: Option<PathBuf>,
}

// Manually implement `FromArgs` so everything after the first "--" goes to
// the wrapped command untouched, including flags that would otherwise be
// parsed as ours.
impl FromArgs for Args {
    fn from_args(cmd_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let (our_args, wrapped) = split_args(args);
        let opts = Options::from_args(cmd_name, our_args)?;

        let wrapped = wrapped.iter().map(|s| s.to_string()).collect();

        Ok(Self { opts, wrapped })
    }
}

impl TopLevelCommand for Args {}

/// Split the args on the first "--" separator (if there is one).
fn split_args<'a>(args: &'a [&'a str]) -> (&'a [&'a str], &'a [&'a str]) {
    let maybe_sep_idx = args.iter().position(|&arg| arg == "--");

    match maybe_sep_idx {
        Some(sep_idx) => {
            let (ours, rest) = args.split_at(sep_idx);
            (ours, &rest[1..]) // trim the "--" itself
        }
        None => (args, &[]),
    }
}

fn main() {
    // The wrapped child owns stdout; all of our logging goes to stderr.
    logger::init_stderr();

    let args = argh::from_env::<Args>();
    if args.wrapped.is_empty() {
        eprintln!("usage: gate-run [options] -- <command> [args...]");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("gate-run error: failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    let config = run::RunConfig {
        requested_project: args.opts.project,
        gate_socket: args.opts.gate_socket,
    };
    let code = rt.block_on(run::run(config, args.wrapped));
    std::process::exit(code);
}
