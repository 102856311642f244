//! Scrape posts command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::validate::load_and_validate;
use super::RunStatus;
use crate::browser::{ChromiumSessionFactory, SessionPool};
use crate::cli::progress::{progress_println, ScrapeProgress};
use crate::config::Settings;
use crate::extract::Extractor;
use crate::links::write_links;
use crate::services::{RunReport, ScrapeEvent, Scheduler};
use crate::sink::{ResultSink, SinkSummary};
use crate::utils::format_duration;

/// Validate the input, scrape every accepted link and write the results.
pub async fn cmd_scrape(
    settings: &Settings,
    input: &Path,
    from_links: bool,
    show_progress: bool,
) -> anyhow::Result<RunStatus> {
    let report = load_and_validate(input)?;
    if !from_links {
        write_links(&settings.links_path, &report.accepted).with_context(|| {
            format!(
                "Failed to write links file {}",
                settings.links_path.display()
            )
        })?;
    }

    let urls = report.accepted;
    let sink = ResultSink::new(urls.len(), settings.sink_options());

    if urls.is_empty() {
        println!("{} No valid post links to scrape", style("!").yellow());
        write_results(&sink)?;
        return Ok(RunStatus::Completed);
    }

    println!(
        "{} Starting browser ({} session(s), {}s timeout)",
        style("→").cyan(),
        settings.max_concurrency,
        settings.navigation_timeout_secs
    );
    let factory = ChromiumSessionFactory::launch(settings.browser.clone())
        .await
        .context("Failed to start browser")?;
    let pool = Arc::new(SessionPool::new(factory, settings.pool_config()));

    if let Err(e) = pool.warm_up().await {
        pool.close().await;
        return Err(anyhow::Error::new(e).context("No browser session could be created"));
    }

    let scheduler = Scheduler::new(
        pool.clone(),
        Extractor::new(settings.navigation_timeout()),
        settings.scrape_config(),
    );

    // Ctrl-C stops dispatching; in-flight work gets the grace period
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_handler = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            progress_println(&format!(
                "{} Interrupted, finishing in-flight posts...",
                style("!").yellow()
            ));
            signal_token.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::channel::<ScrapeEvent>(100);
    let progress_display = if show_progress {
        Some(Arc::new(ScrapeProgress::new(
            scheduler.max_in_flight(),
            urls.len() as u64,
        )))
    } else {
        None
    };
    let event_handler = tokio::spawn(handle_events(event_rx, progress_display.clone()));

    let run = scheduler.run(&urls, &sink, event_tx, cancel).await;

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }
    signal_handler.abort();
    pool.close().await;

    if let Some(ref progress) = progress_display {
        progress.clear();
    }

    let summary = write_results(&sink)?;
    print_summary(&run, &summary);

    if run.cancelled {
        Ok(RunStatus::Interrupted)
    } else {
        Ok(RunStatus::Completed)
    }
}

/// Render scheduler events (UI layer).
async fn handle_events(
    mut event_rx: mpsc::Receiver<ScrapeEvent>,
    progress: Option<Arc<ScrapeProgress>>,
) {
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    while let Some(event) = event_rx.recv().await {
        match event {
            ScrapeEvent::Started { url, .. } => {
                if let Some(ref progress) = progress {
                    progress.start(&url.to_string());
                }
            }
            ScrapeEvent::Retrying {
                url, kind, delay, ..
            } => {
                if let Some(ref progress) = progress {
                    progress.finish(&url.to_string(), false);
                }
                tracing::info!("{} will be retried in {:?} after {}", url, delay, kind);
            }
            ScrapeEvent::Succeeded { url, .. } => {
                succeeded += 1;
                if let Some(ref progress) = progress {
                    progress.set_summary(succeeded, failed);
                    progress.finish(&url.to_string(), true);
                }
            }
            ScrapeEvent::Failed {
                url, kind, message, ..
            } => {
                failed += 1;
                progress_println(&format!(
                    "{} {} {}: {}",
                    style("✗").red(),
                    url,
                    style(kind).yellow(),
                    message
                ));
                if let Some(ref progress) = progress {
                    progress.set_summary(succeeded, failed);
                    progress.finish(&url.to_string(), true);
                }
            }
            ScrapeEvent::Cancelling { in_flight } => {
                tracing::debug!("Cancelling with {} task(s) in flight", in_flight);
            }
        }
    }
}

/// Flush the sink; on failure, try to leave a copy in the temp directory.
fn write_results(sink: &ResultSink) -> anyhow::Result<SinkSummary> {
    match sink.flush() {
        Ok(summary) => Ok(summary),
        Err(e) => {
            tracing::error!("Failed to write results: {}", e);
            match sink.write_recovery_copy(&std::env::temp_dir()) {
                Ok(path) => eprintln!(
                    "{} Results saved to {} instead",
                    style("!").yellow(),
                    path.display()
                ),
                Err(recovery) => {
                    tracing::error!("Recovery copy also failed: {}", recovery)
                }
            }
            Err(anyhow::Error::new(e).context("Failed to write results"))
        }
    }
}

fn print_summary(run: &RunReport, summary: &SinkSummary) {
    println!(
        "{} Scraped {} of {} post(s) in {}",
        style("✓").green(),
        summary.succeeded,
        summary.total,
        format_duration(run.elapsed)
    );
    for (kind, count) in &summary.failed_by_kind {
        println!("  {} {} {}", style("✗").red(), count, kind);
    }
    if summary.unprocessed() > 0 {
        println!(
            "  {} {} not processed (interrupted)",
            style("!").yellow(),
            summary.unprocessed()
        );
    }
    if run.retries > 0 {
        println!("  {} {} retry attempt(s)", style("→").dim(), run.retries);
    }
    tracing::info!(
        "Sessions created: {}, discarded: {}, peak in use: {}",
        run.pool.created,
        run.pool.discarded,
        run.pool.peak_in_use
    );
}
