//! CLI commands implementation.

mod scrape;
mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::sink::SinkError;

/// Exit status for setup failures: bad config, unreadable input, no browser.
pub const EXIT_SETUP: u8 = 2;
/// Exit status when the output could not be written.
pub const EXIT_SINK: u8 = 3;
/// Exit status after Ctrl-C (partial results are still written).
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "postharvest")]
#[command(about = "Bulk metadata harvester for social-media post links")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML); defaults to ./postharvest.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and normalize post links into the cleaned links file
    Validate {
        /// Text file with one link (or a line containing links) per record
        input: PathBuf,
        /// Where to write the canonical links (default: cleaned_links.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate links, then scrape post metadata into the output table
    Scrape {
        /// Raw input file, or a cleaned links file with --from-links
        input: PathBuf,
        /// Treat INPUT as a cleaned links file and do not rewrite it
        #[arg(long)]
        from_links: bool,
        /// Output table path (default: posts.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Where to write the canonical links
        #[arg(long)]
        links_out: Option<PathBuf>,
        /// Also write failed links with their failure kind
        #[arg(long)]
        failures: Option<PathBuf>,
        /// Number of concurrent browser sessions (default: 5)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Navigation timeout per post in seconds (default: 30)
        #[arg(long)]
        timeout: Option<u64>,
        /// Retries for transient failures (default: 0)
        #[arg(long)]
        retries: Option<u32>,
        /// Show per-session progress
        #[arg(short = 'P', long)]
        progress: bool,
    },
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Interrupted,
}

impl RunStatus {
    pub fn exit_status(self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// Exit status for a command error.
pub fn exit_status_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<SinkError>().is_some() {
        EXIT_SINK
    } else {
        EXIT_SETUP
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<RunStatus> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { input, output } => {
            if let Some(output) = output {
                settings.links_path = output;
            }
            validate::cmd_validate(&settings, &input)?;
            Ok(RunStatus::Completed)
        }
        Commands::Scrape {
            input,
            from_links,
            output,
            links_out,
            failures,
            workers,
            timeout,
            retries,
            progress,
        } => {
            if let Some(output) = output {
                settings.output_path = output;
            }
            if let Some(links_out) = links_out {
                settings.links_path = links_out;
            }
            if failures.is_some() {
                settings.failures_path = failures;
            }
            if let Some(workers) = workers {
                settings.max_concurrency = workers;
            }
            if let Some(timeout) = timeout {
                settings.navigation_timeout_secs = timeout;
            }
            if let Some(retries) = retries {
                settings.retry.max_retries = retries;
            }
            settings.validate()?;
            scrape::cmd_scrape(&settings, &input, from_links, progress).await
        }
    }
}
