//! Scrape service types and events.

use std::time::Duration;

use crate::browser::PoolStats;
use crate::links::CanonicalUrl;
use crate::models::FailureKind;

/// Events emitted while the scheduler runs.
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    /// A task acquired its turn and is fetching
    Started { url: CanonicalUrl, attempt: u32 },
    /// Task failed with a transient kind and will be dispatched again
    Retrying {
        url: CanonicalUrl,
        kind: FailureKind,
        attempt: u32,
        delay: Duration,
    },
    /// Post extracted
    Succeeded { url: CanonicalUrl, completed: usize },
    /// Task reached its terminal failure
    Failed {
        url: CanonicalUrl,
        kind: FailureKind,
        message: String,
        completed: usize,
    },
    /// Stop signal received; no further dispatches
    Cancelling { in_flight: usize },
}

/// Lifecycle of one URL inside a run. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn can_become(&self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => true,
            // Retry, or hand back after cancellation
            (TaskState::Running, TaskState::Pending) => true,
            (TaskState::Running, TaskState::Succeeded | TaskState::Failed) => true,
            _ => false,
        }
    }
}

/// Bounded retries with kind-dependent exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    const MAX_DELAY: Duration = Duration::from_secs(60);
    const MAX_CHALLENGE_DELAY: Duration = Duration::from_secs(300);
    const CHALLENGE_FACTOR: u32 = 4;

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(2000),
        }
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Whether a task that failed with `kind` after `attempts` attempts
    /// goes back to pending.
    pub fn should_retry(&self, kind: FailureKind, attempts: u32) -> bool {
        kind.is_transient() && attempts <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based) after a `kind` failure.
    pub fn backoff(&self, kind: FailureKind, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.pow(exponent));
        match kind {
            FailureKind::ChallengeDetected => delay
                .saturating_mul(Self::CHALLENGE_FACTOR)
                .min(Self::MAX_CHALLENGE_DELAY),
            _ => delay.min(Self::MAX_DELAY),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Maximum tasks in flight; further capped by the pool capacity.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// How long in-flight tasks get to wind down after cancellation.
    pub grace_period: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            retry: RetryPolicy::none(),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Result of a scheduler run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: usize,
    /// URLs left without a terminal outcome.
    pub unprocessed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub pool: PoolStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds_are_never_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert!(!policy.should_retry(FailureKind::ContentNotFound, 1));
        assert!(!policy.should_retry(FailureKind::UnexpectedStructure, 1));
        assert!(policy.should_retry(FailureKind::NavigationTimeout, 1));
        assert!(policy.should_retry(FailureKind::PoolExhausted, 3));
        assert!(!policy.should_retry(FailureKind::PoolExhausted, 4));
        assert!(!RetryPolicy::none().should_retry(FailureKind::SessionFatal, 1));
    }

    #[test]
    fn challenge_backoff_is_longest() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(
            policy.backoff(FailureKind::NavigationTimeout, 1),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.backoff(FailureKind::NavigationTimeout, 3),
            Duration::from_secs(4)
        );
        assert_eq!(
            policy.backoff(FailureKind::ChallengeDetected, 3),
            Duration::from_secs(16)
        );
        assert_eq!(
            policy.backoff(FailureKind::NavigationTimeout, 30),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.backoff(FailureKind::ChallengeDetected, 30),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn state_transitions() {
        use TaskState::*;
        assert!(Pending.can_become(Running));
        assert!(Running.can_become(Pending));
        assert!(Running.can_become(Failed));
        assert!(!Pending.can_become(Succeeded));
        assert!(!Succeeded.can_become(Running));
        assert!(!Failed.can_become(Pending));
        assert!(Failed.is_terminal());
    }
}
