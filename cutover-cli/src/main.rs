//! Entry point for the `cutover` binary.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cutover_cli::args::Cli;
use cutover_cli::run::{run, Mode};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())))
        .with_target(true)
        .init();

    let mode = Mode::select(cli.pull_images, cli.migrate_all);
    let config = cli.to_config();
    tracing::info!(strategy = %config.kind, ?mode, dry_run = config.dry_run, "cutover starting");

    match run(config, mode).await {
        Ok(outcome) => {
            tracing::info!("{outcome}");
            println!("{outcome}");
        }
        Err(e) if e.needs_manual_intervention() => {
            tracing::error!("{e}");
            eprintln!("WARNING: the host is half migrated and needs manual intervention: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
