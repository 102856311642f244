//! Result sink: accumulates terminal outcomes and writes the output table.
//!
//! Outcomes are kept in completion order. A flush writes the complete set
//! through a temp file and rename, so an interrupted or failed flush leaves
//! any earlier output intact; the sink is not drained and the flush can be
//! retried.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{FailureEntry, FailureKind, Outcome, PostRecord};
use crate::utils::write_atomically;

/// Output table header, without the optional leading `Link` column.
pub const POST_HEADER: [&str; 6] = [
    "Text",
    "Username",
    "Date",
    "Comment Count",
    "Like Count",
    "Share Count",
];

pub const FAILURE_HEADER: [&str; 3] = ["Link", "Kind", "Message"];

/// Row order used when flushing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPolicy {
    /// Order of the validated input.
    #[default]
    Input,
    /// Order in which tasks finished.
    Completion,
}

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub output_path: PathBuf,
    pub failures_path: Option<PathBuf>,
    pub delimiter: u8,
    pub include_link: bool,
    pub order: OrderPolicy,
}

impl SinkOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            failures_path: None,
            delimiter: b',',
            include_link: false,
            order: OrderPolicy::Input,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkSummary {
    /// Validated URLs handed to the scheduler.
    pub total: usize,
    pub succeeded: usize,
    pub failed_by_kind: BTreeMap<FailureKind, usize>,
}

impl SinkSummary {
    pub fn failed(&self) -> usize {
        self.failed_by_kind.values().sum()
    }

    /// URLs without a terminal outcome (cancelled runs).
    pub fn unprocessed(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed())
    }
}

#[derive(Debug)]
struct Recorded {
    /// Position of the URL in the validated input.
    position: usize,
    outcome: Outcome,
}

/// Collects outcomes and writes them out on flush.
#[derive(Debug)]
pub struct ResultSink {
    options: SinkOptions,
    total: usize,
    recorded: Mutex<Vec<Recorded>>,
}

impl ResultSink {
    pub fn new(total: usize, options: SinkOptions) -> Self {
        Self {
            options,
            total,
            recorded: Mutex::new(Vec::with_capacity(total)),
        }
    }

    pub fn options(&self) -> &SinkOptions {
        &self.options
    }

    /// Record a terminal outcome for the URL at `position` in the input.
    pub fn record(&self, position: usize, outcome: Outcome) {
        self.lock().push(Recorded { position, outcome });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outcomes in completion order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.lock().iter().map(|r| r.outcome.clone()).collect()
    }

    pub fn summary(&self) -> SinkSummary {
        let recorded = self.lock();
        let mut summary = SinkSummary {
            total: self.total,
            ..Default::default()
        };
        for r in recorded.iter() {
            match &r.outcome {
                Outcome::Succeeded(_) => summary.succeeded += 1,
                Outcome::Failed(entry) => {
                    *summary.failed_by_kind.entry(entry.kind).or_insert(0) += 1
                }
            }
        }
        summary
    }

    /// Write the posts table (and the failure log when configured).
    pub fn flush(&self) -> Result<SinkSummary, SinkError> {
        let (posts, failures) = self.ordered();

        self.write_posts_to(&self.options.output_path, &posts)?;
        info!(
            "Wrote {} post(s) to {}",
            posts.len(),
            self.options.output_path.display()
        );

        if let Some(ref path) = self.options.failures_path {
            write_atomically(path, |w| self.write_failures(w, &failures)).map_err(|source| {
                SinkError::Write {
                    path: path.clone(),
                    source,
                }
            })?;
            debug!("Wrote {} failure(s) to {}", failures.len(), path.display());
        }

        Ok(self.summary())
    }

    /// Write the posts table into `dir` under a timestamped name. Used to
    /// salvage results when the configured output cannot be written.
    pub fn write_recovery_copy(&self, dir: &Path) -> Result<PathBuf, SinkError> {
        let name = format!(
            "postharvest-recovery-{}.csv",
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        );
        let path = dir.join(name);
        let (posts, _) = self.ordered();
        self.write_posts_to(&path, &posts)?;
        Ok(path)
    }

    fn write_posts_to(&self, path: &Path, posts: &[PostRecord]) -> Result<(), SinkError> {
        write_atomically(path, |w| self.write_posts(w, posts)).map_err(|source| {
            SinkError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Snapshot of successes and failures in flush order.
    fn ordered(&self) -> (Vec<PostRecord>, Vec<FailureEntry>) {
        let recorded = self.lock();
        let mut refs: Vec<&Recorded> = recorded.iter().collect();
        if self.options.order == OrderPolicy::Input {
            refs.sort_by_key(|r| r.position);
        }

        let mut posts = Vec::new();
        let mut failures = Vec::new();
        for r in refs {
            match &r.outcome {
                Outcome::Succeeded(record) => posts.push(record.clone()),
                Outcome::Failed(entry) => failures.push(entry.clone()),
            }
        }
        (posts, failures)
    }

    fn csv_writer<'w>(&self, w: &'w mut dyn Write) -> csv::Writer<&'w mut dyn Write> {
        csv::WriterBuilder::new()
            .delimiter(self.options.delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(w)
    }

    fn write_posts(&self, w: &mut dyn Write, posts: &[PostRecord]) -> io::Result<()> {
        let mut writer = self.csv_writer(w);

        let mut header: Vec<&str> = Vec::with_capacity(POST_HEADER.len() + 1);
        if self.options.include_link {
            header.push("Link");
        }
        header.extend(POST_HEADER);
        writer.write_record(&header)?;

        for post in posts {
            let mut row = Vec::with_capacity(header.len());
            if self.options.include_link {
                row.push(post.url.to_string());
            }
            row.push(post.text.clone());
            row.push(post.username.clone());
            row.push(post.formatted_date());
            row.push(post.comment_count.to_string());
            row.push(post.like_count.to_string());
            row.push(post.share_count.to_string());
            writer.write_record(&row)?;
        }

        writer.flush()
    }

    fn write_failures(&self, w: &mut dyn Write, failures: &[FailureEntry]) -> io::Result<()> {
        let mut writer = self.csv_writer(w);
        writer.write_record(FAILURE_HEADER)?;
        for entry in failures {
            writer.write_record([
                entry.url.to_string().as_str(),
                entry.kind.as_str(),
                entry.message.as_deref().unwrap_or(""),
            ])?;
        }
        writer.flush()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Recorded>> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
