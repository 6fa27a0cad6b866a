use gated::cli::Args;

pub fn main() {
    logger::init();

    let args = argh::from_env::<Args>();
    if let Err(err) = args.run() {
        eprintln!("gated error: {err:#}");
        std::process::exit(1);
    }
}
