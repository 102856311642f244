//! postharvest - bulk metadata harvester for social-media post links.

use std::process::ExitCode;

use console::style;
use postharvest::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "postharvest=info"
    } else {
        "postharvest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli::run().await {
        Ok(status) => ExitCode::from(status.exit_status()),
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            ExitCode::from(cli::exit_status_for(&e))
        }
    }
}
