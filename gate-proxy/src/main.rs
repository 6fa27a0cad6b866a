use gate_proxy::cli::Args;

pub fn main() {
    logger::init();

    let args = argh::from_env::<Args>();
    if let Err(err) = args.run() {
        eprintln!("gate-proxy error: {err:#}");
        std::process::exit(1);
    }
}
