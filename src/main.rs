//! tmpmail - Entry point for the disposable-mailbox CLI

use clap::Parser;

use tmpmail::cli::{self, Cli};
use tmpmail::config::Config;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tmpmail=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    if let Err(e) = cli::run(cli, config).await {
        tracing::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
