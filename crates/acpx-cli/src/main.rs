//! acpx binary entry point

use clap::Parser;
use tracing_subscriber::EnvFilter;

use acpx_cli::cli::{Cli, Command};

/// Env var controlling log verbosity (standard EnvFilter syntax)
const LOG_ENV: &str = "ACPX_LOG";

fn init_logging(command: &Command) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Command::QueueOwner(args) = command {
        // Detached owners have no stderr worth writing to; log into the
        // session directory instead.
        let paths = acpx_store::StorePaths::discover();
        let log_path = paths.owner_log_path(&args.session);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.command);
    let code = acpx_cli::cli::execute(cli).await;
    std::process::exit(code);
}
