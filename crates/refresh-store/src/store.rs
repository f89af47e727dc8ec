use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::StoreConfig;
use crate::engine::{Producer, RefreshEngine};
use crate::error::{ConfigError, StoreError};
use crate::slot::ExpiringSlot;

/// The first sleep of [`Store::wait`].
const INITIAL_WAIT_BACKOFF: Duration = Duration::from_millis(1);

/// The longest single sleep of [`Store::wait`].
const MAX_WAIT_BACKOFF: Duration = Duration::from_secs(1);

/// The content of a store's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedResult<T, E> {
    /// No update has completed yet.
    Unset,
    /// The last update produced a value.
    Value(T),
    /// The last update failed.
    Error(E),
}

struct StoreInner<T, E> {
    config: StoreConfig,
    slot: Arc<ExpiringSlot<CachedResult<T, E>>>,
    shutdown: CancellationToken,
    _shutdown_on_drop: DropGuard,
    engine: JoinHandle<()>,
}

/// A value that is refreshed in the background.
///
/// Creating a store spawns a task on the current tokio runtime that calls the producer once per
/// [`update_interval`](StoreConfig::update_interval). Readers never wait for the producer:
/// [`get`](Self::get) returns the outcome of the most recently completed update.
///
/// Stores are cheap to clone. The background task stops when [`shutdown`](Self::shutdown) is
/// called or when the last clone is dropped.
pub struct Store<T, E> {
    inner: Arc<StoreInner<T, E>>,
}

impl<T, E> Store<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Creates the store and starts refreshing it.
    ///
    /// Until the first update has completed, which happens one `update_interval` from now,
    /// [`get`](Self::get) returns [`StoreError::Unset`].
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid, see [`StoreConfig::validate`], or when called outside
    /// of a tokio runtime.
    pub fn new<P>(producer: P, config: StoreConfig) -> Self
    where
        P: Producer<T, E>,
    {
        match Self::try_new(producer, config) {
            Ok(store) => store,
            Err(err) => panic!("invalid store config: {err}"),
        }
    }

    /// Creates the store and starts refreshing it, rejecting an invalid config.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn try_new<P>(producer: P, config: StoreConfig) -> Result<Self, ConfigError>
    where
        P: Producer<T, E>,
    {
        let config = config.validate()?;

        // Seeded so that "never set" can be told apart from "expired".
        let slot = Arc::new(ExpiringSlot::new());
        slot.set(CachedResult::Unset, Duration::ZERO);

        let shutdown = CancellationToken::new();
        let engine = RefreshEngine::new(
            Arc::new(producer),
            Arc::clone(&slot),
            config,
            shutdown.clone(),
        )
        .spawn();

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                slot,
                _shutdown_on_drop: shutdown.clone().drop_guard(),
                shutdown,
                engine,
            }),
        })
    }
}

impl<T, E> Store<T, E> {
    /// Returns the outcome of the most recent update.
    ///
    /// - [`StoreError::Unset`] if no update has completed yet.
    /// - [`StoreError::Expired`] if the last update is older than
    ///   [`result_validity`](StoreConfig::result_validity).
    /// - [`StoreError::Producer`] if the last update failed.
    pub fn get(&self) -> Result<T, StoreError<E>>
    where
        T: Clone,
        E: Clone,
    {
        match self.inner.slot.get().as_deref() {
            None => Err(StoreError::Expired),
            Some(CachedResult::Unset) => Err(StoreError::Unset),
            Some(CachedResult::Value(value)) => Ok(value.clone()),
            Some(CachedResult::Error(err)) => Err(StoreError::Producer(err.clone())),
        }
    }

    /// Waits until the first update has completed, for at most `max_wait`.
    ///
    /// This returns `Ok` for any outcome of that update, including a failed one. Use
    /// [`get`](Self::get) afterwards to find out what it was. If no update completes in time,
    /// this returns [`StoreError::StillUnset`].
    ///
    /// The store is polled with exponential backoff, starting at 1ms and growing up to 1s between
    /// checks.
    ///
    /// A `max_wait` too large to be represented as an instant waits without limit.
    pub async fn wait(&self, max_wait: Duration) -> Result<(), StoreError<E>> {
        let deadline = tokio::time::Instant::now().checked_add(max_wait);

        for backoff in Backoff::new() {
            if deadline.is_some_and(|deadline| tokio::time::Instant::now() > deadline) {
                break;
            }
            if !self.is_unset() {
                return Ok(());
            }
            tokio::time::sleep(backoff).await;
        }

        tracing::debug!(?max_wait, "Gave up waiting for the first update");
        Err(StoreError::StillUnset(max_wait))
    }

    /// Like [`wait`](Self::wait), but blocks the current thread.
    ///
    /// Use this from synchronous code only. Calling it on a runtime thread blocks that thread.
    pub fn wait_blocking(&self, max_wait: Duration) -> Result<(), StoreError<E>> {
        let deadline = std::time::Instant::now().checked_add(max_wait);

        for backoff in Backoff::new() {
            if deadline.is_some_and(|deadline| std::time::Instant::now() > deadline) {
                break;
            }
            if !self.is_unset() {
                return Ok(());
            }
            std::thread::sleep(backoff);
        }

        Err(StoreError::StillUnset(max_wait))
    }

    /// Stops the background updates.
    ///
    /// The last result stays readable until it expires. A producer that is running right now
    /// sees its [`UpdateContext`](crate::UpdateContext) cancelled.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Returns `true` while the background task is running.
    ///
    /// This turns `false` shortly after [`shutdown`](Self::shutdown), or if the task was
    /// aborted because its runtime shut down.
    pub fn is_running(&self) -> bool {
        !self.inner.engine.is_finished()
    }

    /// The validated configuration, with defaults filled in.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Time since the last update completed, or since the store was created if none has.
    pub fn age(&self) -> Option<Duration> {
        self.inner.slot.age()
    }

    fn is_unset(&self) -> bool {
        matches!(self.inner.slot.get().as_deref(), Some(CachedResult::Unset))
    }
}

impl<T, E> Clone for Store<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Store<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("slot", &self.inner.slot)
            .field("shutdown", &self.is_shutdown())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Sleep durations for polling, doubling up to [`MAX_WAIT_BACKOFF`].
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: INITIAL_WAIT_BACKOFF,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (current * 2).min(MAX_WAIT_BACKOFF);
        Some(current)
    }
}
