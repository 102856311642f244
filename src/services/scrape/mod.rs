//! Scrape scheduler.
//!
//! Dispatches one task per canonical URL into a bounded `JoinSet`. Each task
//! acquires a pooled session, runs the extractor and hands its result back
//! to the dispatcher, which is the only writer into the [`ResultSink`].
//! Separated from UI concerns - emits events for progress tracking.

mod types;

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{PoolError, SessionFactory, SessionPool};
use crate::extract::{ExtractError, Extractor};
use crate::links::CanonicalUrl;
use crate::models::{FailureEntry, FailureKind, Outcome, PostRecord};
use crate::sink::ResultSink;

pub use types::{RetryPolicy, RunReport, ScrapeConfig, ScrapeEvent, TaskState};

/// What a task hands back to the dispatcher.
#[derive(Debug)]
enum TaskOutput {
    Extracted(PostRecord),
    Failed { kind: FailureKind, message: String },
    /// Abandoned at a suspension point after the stop signal.
    Cancelled,
}

/// A task waiting for its retry backoff to pass.
struct Delayed {
    ready_at: tokio::time::Instant,
    position: usize,
}

/// Runs extraction for a batch of URLs with bounded concurrency.
pub struct Scheduler<F: SessionFactory> {
    pool: Arc<SessionPool<F>>,
    extractor: Arc<Extractor>,
    config: ScrapeConfig,
    completed: Arc<AtomicUsize>,
}

impl<F: SessionFactory> Scheduler<F> {
    pub fn new(pool: Arc<SessionPool<F>>, extractor: Extractor, config: ScrapeConfig) -> Self {
        Self {
            pool,
            extractor: Arc::new(extractor),
            config,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of tasks that reached a terminal state so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Maximum tasks in flight for this scheduler.
    pub fn max_in_flight(&self) -> usize {
        self.config
            .max_concurrency
            .min(self.pool.capacity())
            .max(1)
    }

    /// Process every URL, recording terminal outcomes into `sink`.
    ///
    /// Returns once all tasks are terminal, or once `cancel` fires and the
    /// in-flight tasks have wound down (or been aborted after the grace
    /// period).
    pub async fn run(
        &self,
        urls: &[CanonicalUrl],
        sink: &ResultSink,
        event_tx: mpsc::Sender<ScrapeEvent>,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let max_in_flight = self.max_in_flight();
        info!(
            "Scraping {} URL(s) with up to {} concurrent session(s)",
            urls.len(),
            max_in_flight
        );

        let mut run = RunState::new(urls, sink);
        let mut join_set: JoinSet<(usize, TaskOutput)> = JoinSet::new();

        loop {
            run.promote_due_retries();

            while join_set.len() < max_in_flight && !cancel.is_cancelled() {
                let Some(position) = run.pending.pop_front() else {
                    break;
                };
                run.transition(position, TaskState::Running);
                run.attempts[position] += 1;
                let _ = event_tx
                    .send(ScrapeEvent::Started {
                        url: urls[position].clone(),
                        attempt: run.attempts[position],
                    })
                    .await;
                self.spawn_task(&mut join_set, position, urls[position].clone(), &cancel);
            }

            if join_set.is_empty() && run.pending.is_empty() && run.delayed.is_empty() {
                break;
            }

            let next_retry = run.delayed.iter().map(|d| d.ready_at).min();
            tokio::select! {
                _ = cancel.cancelled() => break,
                joined = join_set.join_next(), if !join_set.is_empty() => {
                    if let Some(Ok((position, output))) = joined {
                        if let Some(event) = self.settle(&mut run, position, output, &cancel) {
                            let _ = event_tx.send(event).await;
                        }
                    }
                }
                _ = sleep_until_next(next_retry), if next_retry.is_some() => {}
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            let _ = event_tx
                .send(ScrapeEvent::Cancelling {
                    in_flight: join_set.len(),
                })
                .await;
            warn!(
                "Stop requested; waiting up to {}s for {} in-flight task(s)",
                self.config.grace_period.as_secs(),
                join_set.len()
            );
            self.wind_down(&mut run, &mut join_set, &cancel).await;
        }

        let report = RunReport {
            total: urls.len(),
            succeeded: run.succeeded,
            failed: run.failed,
            retries: run.retries,
            unprocessed: run.states.iter().filter(|s| !s.is_terminal()).count(),
            cancelled,
            elapsed: started.elapsed(),
            pool: self.pool.stats(),
        };
        info!(
            "Scrape finished: {} succeeded, {} failed, {} unprocessed",
            report.succeeded, report.failed, report.unprocessed
        );
        report
    }

    fn spawn_task(
        &self,
        join_set: &mut JoinSet<(usize, TaskOutput)>,
        position: usize,
        url: CanonicalUrl,
        cancel: &CancellationToken,
    ) {
        let pool = self.pool.clone();
        let extractor = self.extractor.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let output = AssertUnwindSafe(run_task(&pool, &extractor, &url, &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!("Extraction of {} panicked", url);
                    TaskOutput::Failed {
                        kind: FailureKind::UnexpectedStructure,
                        message: "extraction panicked".to_string(),
                    }
                });
            (position, output)
        });
    }

    /// Apply a finished task's output: record a terminal outcome into the
    /// sink or schedule a retry. Returns the event to publish.
    fn settle(
        &self,
        run: &mut RunState<'_>,
        position: usize,
        output: TaskOutput,
        cancel: &CancellationToken,
    ) -> Option<ScrapeEvent> {
        let urls = run.urls;
        let url = &urls[position];
        match output {
            TaskOutput::Extracted(record) => {
                run.transition(position, TaskState::Succeeded);
                run.sink.record(position, Outcome::Succeeded(record));
                run.succeeded += 1;
                let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Extracted {}", url);
                Some(ScrapeEvent::Succeeded {
                    url: url.clone(),
                    completed,
                })
            }
            TaskOutput::Failed { kind, message } => {
                let attempt = run.attempts[position];
                let policy = self.config.retry;
                if !cancel.is_cancelled() && policy.should_retry(kind, attempt) {
                    let delay = policy.backoff(kind, attempt);
                    info!(
                        "Retrying {} after {} (attempt {}, waiting {:?})",
                        url, kind, attempt, delay
                    );
                    let event = ScrapeEvent::Retrying {
                        url: url.clone(),
                        kind,
                        attempt,
                        delay,
                    };
                    run.transition(position, TaskState::Pending);
                    run.retries += 1;
                    run.delayed.push(Delayed {
                        ready_at: tokio::time::Instant::now() + delay,
                        position,
                    });
                    return Some(event);
                }

                let entry = FailureEntry {
                    url: url.clone(),
                    kind,
                    message: Some(message.clone()),
                };
                debug!("Failed {}: {} ({})", url, kind, message);
                let event = ScrapeEvent::Failed {
                    url: url.clone(),
                    kind,
                    message,
                    completed: self.completed.fetch_add(1, Ordering::SeqCst) + 1,
                };
                run.transition(position, TaskState::Failed);
                run.sink.record(position, Outcome::Failed(entry));
                run.failed += 1;
                Some(event)
            }
            TaskOutput::Cancelled => {
                run.transition(position, TaskState::Pending);
                None
            }
        }
    }

    /// Collect what in-flight tasks finish within the grace period, then
    /// abort the rest.
    async fn wind_down(
        &self,
        run: &mut RunState<'_>,
        join_set: &mut JoinSet<(usize, TaskOutput)>,
        cancel: &CancellationToken,
    ) {
        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((position, output)))) => {
                    // Retries are never scheduled once cancelled
                    self.settle(run, position, output, cancel);
                }
                Ok(Some(Err(e))) => debug!("Task ended abnormally: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Aborting {} task(s) still running after the grace period",
                        join_set.len()
                    );
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }
    }
}

/// Dispatcher bookkeeping for one run.
struct RunState<'a> {
    urls: &'a [CanonicalUrl],
    sink: &'a ResultSink,
    states: Vec<TaskState>,
    attempts: Vec<u32>,
    pending: VecDeque<usize>,
    delayed: Vec<Delayed>,
    succeeded: usize,
    failed: usize,
    retries: usize,
}

impl<'a> RunState<'a> {
    fn new(urls: &'a [CanonicalUrl], sink: &'a ResultSink) -> Self {
        Self {
            urls,
            sink,
            states: vec![TaskState::Pending; urls.len()],
            attempts: vec![0; urls.len()],
            pending: (0..urls.len()).collect(),
            delayed: Vec::new(),
            succeeded: 0,
            failed: 0,
            retries: 0,
        }
    }

    fn promote_due_retries(&mut self) {
        let now = tokio::time::Instant::now();
        let pending = &mut self.pending;
        self.delayed.retain(|d| {
            if d.ready_at <= now {
                pending.push_back(d.position);
                false
            } else {
                true
            }
        });
    }

    fn transition(&mut self, position: usize, next: TaskState) {
        let current = self.states[position];
        debug_assert!(
            current.can_become(next),
            "invalid task transition {:?} -> {:?}",
            current,
            next
        );
        self.states[position] = next;
    }
}

async fn sleep_until_next(next: Option<tokio::time::Instant>) {
    if let Some(at) = next {
        tokio::time::sleep_until(at).await;
    }
}

/// One attempt for one URL. A fatal session error gets one replacement
/// session before it becomes the task's outcome.
async fn run_task<F: SessionFactory>(
    pool: &SessionPool<F>,
    extractor: &Extractor,
    url: &CanonicalUrl,
    cancel: &CancellationToken,
) -> TaskOutput {
    let mut replaced = false;
    loop {
        let acquired = tokio::select! {
            _ = cancel.cancelled() => return TaskOutput::Cancelled,
            acquired = pool.acquire() => acquired,
        };
        let mut session = match acquired {
            Ok(session) => session,
            Err(PoolError::Closed) => return TaskOutput::Cancelled,
            Err(e @ PoolError::Exhausted(_)) => {
                return TaskOutput::Failed {
                    kind: FailureKind::PoolExhausted,
                    message: e.to_string(),
                }
            }
            Err(PoolError::Create(e)) => {
                return TaskOutput::Failed {
                    kind: FailureKind::SessionFatal,
                    message: e.to_string(),
                }
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = extractor.extract(&mut *session, url) => Some(result),
        };
        let Some(result) = result else {
            return TaskOutput::Cancelled;
        };

        match result {
            Ok(record) => return TaskOutput::Extracted(record),
            Err(ExtractError::SessionFatal(message)) => {
                session.discard().await;
                if replaced {
                    return TaskOutput::Failed {
                        kind: FailureKind::SessionFatal,
                        message,
                    };
                }
                warn!("Session died on {} ({}); retrying on a new session", url, message);
                replaced = true;
            }
            Err(e) => {
                return TaskOutput::Failed {
                    kind: e.kind(),
                    message: e.message().to_string(),
                }
            }
        }
    }
}
