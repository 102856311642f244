//! Bounded pool of browser sessions.
//!
//! Sessions are created lazily up to `max_sessions`. A semaphore bounds the
//! number of handles out at once; the idle free-list sits behind a single
//! mutex. A handle returns its session to the free-list when dropped, unless
//! it was discarded after a fatal error, in which case the next acquire
//! creates a replacement.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{Session, SessionError, SessionFactory};

/// Configuration for a session pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum sessions alive and handed out at once.
    pub max_sessions: usize,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session became available within {}s", .0.as_secs())]
    Exhausted(Duration),
    #[error("failed to create browser session: {0}")]
    Create(SessionError),
    #[error("session pool is closed")]
    Closed,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub discarded: usize,
    pub idle: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    discarded: AtomicUsize,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
}

/// Pool of reusable sessions produced by a [`SessionFactory`].
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<F::Session>>,
    counters: Counters,
}

impl<F: SessionFactory> SessionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let max = config.max_sessions.max(1);
        info!(
            "Created session pool (max {} session(s), acquire timeout {}s)",
            max,
            config.acquire_timeout.as_secs()
        );
        Self {
            factory,
            permits: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::with_capacity(max)),
            counters: Counters::default(),
            config: PoolConfig {
                max_sessions: max,
                ..config
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Create one session up front so an engine that cannot produce any
    /// session is detected before the batch starts.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let session = self.acquire().await?;
        session.release();
        Ok(())
    }

    /// Wait for a free slot and hand out a session, creating one if the
    /// free-list is empty.
    pub async fn acquire(&self) -> Result<PooledSession<'_, F>, PoolError> {
        let timeout = self.config.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                warn!("Timed out after {}s waiting for a session", timeout.as_secs());
                return Err(PoolError::Exhausted(timeout));
            }
        };

        let reused = self.lock_idle().pop();
        let session = match reused {
            Some(session) => session,
            None => {
                let session = self.factory.create().await.map_err(PoolError::Create)?;
                let created = self.counters.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Created session #{}", created);
                session
            }
        };

        let in_use = self.counters.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_in_use.fetch_max(in_use, Ordering::SeqCst);

        Ok(PooledSession {
            pool: self,
            session: Some(session),
            _permit: permit,
        })
    }

    /// Return a session to the free-list.
    pub fn release(&self, session: PooledSession<'_, F>) {
        session.release();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            idle: self.lock_idle().len(),
            in_use: self.counters.in_use.load(Ordering::SeqCst),
            peak_in_use: self.counters.peak_in_use.load(Ordering::SeqCst),
        }
    }

    /// Stop handing out sessions, close idle ones and shut the engine down.
    pub async fn close(&self) {
        self.permits.close();
        let sessions: Vec<F::Session> = std::mem::take(&mut *self.lock_idle());
        debug!("Closing {} idle session(s)", sessions.len());
        for mut session in sessions {
            session.close().await;
        }
        self.factory.shutdown().await;
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<F::Session>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(&self, session: F::Session) {
        self.counters.in_use.fetch_sub(1, Ordering::SeqCst);
        self.lock_idle().push(session);
    }

    fn forget(&self) {
        self.counters.in_use.fetch_sub(1, Ordering::SeqCst);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

/// A session checked out of a [`SessionPool`]. Exclusive to its holder.
///
/// Dropping the handle returns the session to the pool.
pub struct PooledSession<'a, F: SessionFactory> {
    pool: &'a SessionPool<F>,
    session: Option<F::Session>,
    _permit: OwnedSemaphorePermit,
}

impl<F: SessionFactory> PooledSession<'_, F> {
    /// Return the session for reuse.
    pub fn release(self) {}

    /// Close the session and keep it out of the pool.
    pub async fn discard(mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            self.pool.forget();
            warn!("Discarded browser session after fatal error");
        }
    }
}

impl<F: SessionFactory> Deref for PooledSession<'_, F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_ref()
            .unwrap_or_else(|| unreachable!("session is present until drop or discard"))
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_mut()
            .unwrap_or_else(|| unreachable!("session is present until drop or discard"))
    }
}

impl<F: SessionFactory> Drop for PooledSession<'_, F> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.put_back(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{NavigateOptions, RenderedDocument};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct CountingSession {
        id: usize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Session for CountingSession {
        async fn navigate(
            &mut self,
            url: &str,
            _options: &NavigateOptions,
        ) -> Result<RenderedDocument, SessionError> {
            Ok(RenderedDocument::new(url, format!("<p>{}</p>", self.id)))
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        next_id: AtomicUsize,
        closed: Arc<AtomicUsize>,
        fail: AtomicBool,
        shut_down: AtomicBool,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        type Session = CountingSession;

        async fn create(&self) -> Result<CountingSession, SessionError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::Fatal("engine gone".to_string()));
            }
            Ok(CountingSession {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                closed: self.closed.clone(),
            })
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn pool(max: usize, timeout_ms: u64) -> SessionPool<CountingFactory> {
        SessionPool::new(
            CountingFactory::default(),
            PoolConfig {
                max_sessions: max,
                acquire_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn sessions_are_created_lazily_and_reused() {
        let pool = pool(2, 100);
        assert_eq!(pool.stats().created, 0);

        let first = pool.acquire().await.unwrap();
        let first_id = first.id;
        first.release();

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id, first_id);
        drop(again);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn acquire_times_out_when_all_sessions_are_out() {
        let pool = pool(1, 50);
        let held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::Exhausted(_)));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn discarded_session_is_replaced_on_next_acquire() {
        let pool = pool(1, 100);
        let session = pool.acquire().await.unwrap();
        let old_id = session.id;
        session.discard().await;

        let replacement = pool.acquire().await.unwrap();
        assert_ne!(replacement.id, old_id);

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_up_reports_creation_failure() {
        let pool = pool(1, 100);
        pool.factory().fail.store(true, Ordering::SeqCst);
        let err = pool.warm_up().await.err().unwrap();
        assert!(matches!(err, PoolError::Create(SessionError::Fatal(_))));
        // The slot is not leaked by the failed creation.
        pool.factory().fail.store(false, Ordering::SeqCst);
        assert!(pool.warm_up().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_holders_never_exceed_capacity() {
        let pool = Arc::new(pool(3, 5_000));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let session = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(session);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = pool.stats();
        assert!(stats.peak_in_use <= 3, "peak was {}", stats.peak_in_use);
        assert!(stats.created <= 3);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn close_tears_down_idle_sessions_and_engine() {
        let pool = pool(2, 100);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        pool.close().await;
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 2);
        assert!(pool.factory().shut_down.load(Ordering::SeqCst));
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
