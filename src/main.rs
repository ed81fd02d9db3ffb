use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    let cli = remotion::cli::Cli::parse();
    if let Err(e) = remotion::run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
