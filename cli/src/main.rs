//! cluster-gitops - reconcile an EKS cluster and bootstrap Flux on it

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cluster_gitops::cli::Cli;
use cluster_gitops::output::json;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let json_mode = cli.json;
    if let Err(e) = cli.run().await {
        if json_mode && let Ok(obj) = json::format_error(&format!("{e:#}"), json::error_code(&e)) {
            println!("{obj}");
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
