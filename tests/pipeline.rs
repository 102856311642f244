//! End-to-end pipeline tests against a fake browser engine.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use postharvest::browser::{
    NavigateOptions, PoolConfig, RenderedDocument, Session, SessionError, SessionFactory,
    SessionPool,
};
use postharvest::extract::Extractor;
use postharvest::links::{validate_lines, CanonicalUrl};
use postharvest::models::{FailureKind, Outcome};
use postharvest::services::{RetryPolicy, RunReport, ScrapeConfig, ScrapeEvent, Scheduler};
use postharvest::sink::{ResultSink, SinkOptions};

/// Browser stand-in that renders a post page for every URL except the ones
/// listed as timing out, and records how many navigations overlap.
#[derive(Clone, Default)]
struct FakeEngine {
    timeouts: Arc<HashSet<u64>>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    navigations: Arc<AtomicUsize>,
}

impl FakeEngine {
    fn new(delay: Duration, timeouts: &[u64]) -> Self {
        Self {
            timeouts: Arc::new(timeouts.iter().copied().collect()),
            delay,
            ..Default::default()
        }
    }
}

struct FakeSession(FakeEngine);

#[async_trait]
impl Session for FakeSession {
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<RenderedDocument, SessionError> {
        let engine = &self.0;
        let active = engine.active.fetch_add(1, Ordering::SeqCst) + 1;
        engine.peak.fetch_max(active, Ordering::SeqCst);
        engine.navigations.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(engine.delay).await;
        engine.active.fetch_sub(1, Ordering::SeqCst);

        let parsed: CanonicalUrl = url.parse().map_err(|_| SessionError::Fatal(url.into()))?;
        if engine.timeouts.contains(&parsed.id()) {
            return Err(SessionError::Timeout(options.timeout));
        }

        let html = format!(
            r#"<html><body><article data-testid="tweet">
                <div data-testid="User-Name"><a href="/{user}">{user}</a></div>
                <div data-testid="tweetText">post number {id}, with a comma</div>
                <a href="/{user}/status/{id}"><time datetime="2024-11-10T12:00:00.000Z"></time></a>
                <button data-testid="reply" aria-label="{id} Replies. Reply"></button>
                <button data-testid="retweet"><span>1.2K</span></button>
                <button data-testid="like"><span>3M</span></button>
            </article></body></html>"#,
            user = parsed.username(),
            id = parsed.id()
        );
        Ok(RenderedDocument::new(url, html))
    }
}

struct FakeFactory(FakeEngine);

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn create(&self) -> Result<FakeSession, SessionError> {
        Ok(FakeSession(self.0.clone()))
    }
}

fn scheduler(engine: &FakeEngine, sessions: usize, concurrency: usize) -> Scheduler<FakeFactory> {
    let pool = SessionPool::new(
        FakeFactory(engine.clone()),
        PoolConfig {
            max_sessions: sessions,
            acquire_timeout: Duration::from_secs(10),
        },
    );
    Scheduler::new(
        Arc::new(pool),
        Extractor::new(Duration::from_secs(5)),
        ScrapeConfig {
            max_concurrency: concurrency,
            retry: RetryPolicy::none(),
            grace_period: Duration::from_millis(500),
        },
    )
}

async fn run(
    scheduler: &Scheduler<FakeFactory>,
    urls: &[CanonicalUrl],
    output: &Path,
    cancel: CancellationToken,
) -> (RunReport, ResultSink) {
    let sink = ResultSink::new(urls.len(), SinkOptions::new(output));
    let (tx, mut rx) = mpsc::channel::<ScrapeEvent>(16);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let report = scheduler.run(urls, &sink, tx, cancel).await;
    drain.await.unwrap();
    (report, sink)
}

fn many_urls(n: u64) -> Vec<CanonicalUrl> {
    (1..=n).map(|id| CanonicalUrl::new("user", id)).collect()
}

#[tokio::test]
async fn scenario_success_and_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let report = validate_lines([
        "https://x.com/alice/status/111",
        "not a link",
        "https://x.com/bob/status/222/",
    ]);
    assert_eq!(
        report
            .accepted
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        vec![
            "https://x.com/alice/status/111",
            "https://x.com/bob/status/222"
        ]
    );
    assert_eq!(report.rejected, 1);

    let engine = FakeEngine::new(Duration::from_millis(5), &[222]);
    let scheduler = scheduler(&engine, 5, 5);
    let output = dir.path().join("posts.csv");
    let (run_report, sink) = run(
        &scheduler,
        &report.accepted,
        &output,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run_report.succeeded, 1);
    assert_eq!(run_report.failed, 1);

    let outcomes = sink.outcomes();
    let failure = outcomes
        .iter()
        .find_map(|o| match o {
            Outcome::Failed(entry) => Some(entry.clone()),
            Outcome::Succeeded(_) => None,
        })
        .unwrap();
    assert_eq!(failure.url.id(), 222);
    assert_eq!(failure.kind, FailureKind::NavigationTimeout);

    sink.flush().unwrap();
    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        content,
        "Text,Username,Date,Comment Count,Like Count,Share Count\n\
         \"post number 111, with a comma\",alice,2024-11-10T12:00:00Z,111,3000000,1200\n"
    );
}

#[tokio::test]
async fn completeness_and_concurrency_bound() {
    let dir = tempfile::tempdir().unwrap();
    let timeouts: Vec<u64> = (1..=40).filter(|id| id % 7 == 0).collect();
    let engine = FakeEngine::new(Duration::from_millis(10), &timeouts);
    // More concurrency requested than the pool can serve
    let scheduler = scheduler(&engine, 3, 10);
    assert_eq!(scheduler.max_in_flight(), 3);

    let urls = many_urls(40);
    let (report, sink) = run(
        &scheduler,
        &urls,
        &dir.path().join("posts.csv"),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.succeeded + report.failed, 40);
    assert_eq!(report.failed, timeouts.len());
    assert_eq!(report.unprocessed, 0);

    let outcomes = sink.outcomes();
    let ids: HashSet<u64> = outcomes.iter().map(|o| o.url().id()).collect();
    assert_eq!(ids.len(), 40, "every URL has exactly one outcome");
    assert_eq!(outcomes.len(), 40);

    assert!(engine.peak.load(Ordering::SeqCst) <= 3);
    assert!(report.pool.peak_in_use <= 3);
    assert!(report.pool.created <= 3);
    assert_eq!(engine.navigations.load(Ordering::SeqCst), 40);
}

#[tokio::test]
async fn rerun_produces_identical_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("posts.csv");
    let urls = many_urls(12);

    let mut contents = Vec::new();
    for _ in 0..2 {
        let engine = FakeEngine::new(Duration::from_millis(3), &[5]);
        let scheduler = scheduler(&engine, 4, 4);
        let (_, sink) = run(&scheduler, &urls, &output, CancellationToken::new()).await;
        sink.flush().unwrap();
        contents.push(std::fs::read(&output).unwrap());
    }

    assert_eq!(contents[0], contents[1]);
    // Header plus eleven successes
    assert_eq!(String::from_utf8_lossy(&contents[0]).lines().count(), 12);
}

#[tokio::test]
async fn cancellation_keeps_partial_results_flushable() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("posts.csv");
    let engine = FakeEngine::new(Duration::from_millis(50), &[]);
    let scheduler = scheduler(&engine, 2, 2);
    let urls = many_urls(20);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(130)).await;
        trigger.cancel();
    });

    let (report, sink) = run(&scheduler, &urls, &output, cancel).await;

    assert!(report.cancelled);
    assert!(sink.len() < 20);
    assert_eq!(report.succeeded + report.failed + report.unprocessed, 20);
    assert_eq!(scheduler.completed(), sink.len());

    let summary = sink.flush().unwrap();
    assert_eq!(summary.unprocessed(), report.unprocessed);
    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.lines().count(), summary.succeeded + 1);
}
