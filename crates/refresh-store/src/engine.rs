//! The background loop that keeps a [`Store`](crate::Store) up to date.
//!
//! Every `update_interval` the engine calls the store's [`Producer`] and writes whatever it
//! returns into the store's slot. The first call happens one full interval after the store was
//! created, never immediately.
//!
//! Cycles run one after another on a single task. A producer that overruns the interval delays
//! the next cycle instead of overlapping with it: the tick that was missed in the meantime fires
//! right after the producer returns, and the timer then continues on its original schedule.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::StoreConfig;
use crate::error::DeadlineExceeded;
use crate::slot::ExpiringSlot;
use crate::store::CachedResult;

/// Computes the current value of a [`Store`](crate::Store).
///
/// This is implemented for every `Fn(UpdateContext) -> impl Future<Output = Result<T, E>>`, so
/// most producers are plain closures or async functions.
pub trait Producer<T, E>: Send + Sync + 'static {
    /// Runs one update.
    ///
    /// The producer is expected to finish by [`UpdateContext::deadline`]. The engine does not
    /// abort producers that overrun it.
    fn produce(&self, ctx: UpdateContext) -> BoxFuture<'static, Result<T, E>>;
}

impl<F, Fut, T, E> Producer<T, E> for F
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    fn produce(&self, ctx: UpdateContext) -> BoxFuture<'static, Result<T, E>> {
        (self)(ctx).boxed()
    }
}

/// Deadline and cancellation for a single call of a [`Producer`].
///
/// The context is cancelled when its deadline passes or when the store shuts down, whichever
/// comes first.
#[derive(Clone, Debug)]
pub struct UpdateContext {
    cycle: u64,
    deadline: Instant,
    shutdown: CancellationToken,
}

impl UpdateContext {
    pub(crate) fn new(cycle: u64, deadline: Instant, shutdown: CancellationToken) -> Self {
        Self {
            cycle,
            deadline,
            shutdown,
        }
    }

    /// The number of this update, starting at 1.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The instant by which the producer should return.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline, zero if it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has passed or the store was shut down.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Completes once the deadline has passed or the store was shut down.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Drives `future` until it completes or this context is cancelled.
    ///
    /// If the context is cancelled first, the future is dropped and [`DeadlineExceeded`] is
    /// returned.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            output = future => Ok(output),
            _ = self.cancelled() => Err(DeadlineExceeded),
        }
    }
}

/// Runs the update cycle of one store.
pub(crate) struct RefreshEngine<T, E> {
    producer: Arc<dyn Producer<T, E>>,
    slot: Arc<ExpiringSlot<CachedResult<T, E>>>,
    config: StoreConfig,
    shutdown: CancellationToken,
}

impl<T, E> RefreshEngine<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Creates an engine from an already validated config.
    pub(crate) fn new(
        producer: Arc<dyn Producer<T, E>>,
        slot: Arc<ExpiringSlot<CachedResult<T, E>>>,
        config: StoreConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            producer,
            slot,
            config,
            shutdown,
        }
    }

    /// Starts the update loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let period = self.config.update_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            interval = ?period,
            timeout = ?self.config.update_timeout,
            "Starting refresh loop"
        );

        let mut cycle = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            cycle += 1;
            self.update(cycle).await;
        }

        tracing::info!(cycles = cycle, "Refresh loop stopped");
    }

    /// Runs one cycle: calls the producer and stores its outcome.
    async fn update(&self, cycle: u64) {
        let started = Instant::now();
        let ctx = UpdateContext::new(
            cycle,
            started + self.config.update_timeout,
            self.shutdown.clone(),
        );

        let span = tracing::debug_span!("refresh", cycle);
        let produce = async move { self.producer.produce(ctx).await };
        let result = AssertUnwindSafe(produce)
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let _entered = span.enter();

        // A panicking producer leaves the previous result in place.
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                tracing::error!(panic = panic_message(&*payload), "Producer panicked");
                return;
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.config.update_timeout {
            tracing::warn!(?elapsed, "Producer ignored its deadline");
        }

        let cached = match result {
            Ok(value) => {
                tracing::debug!(?elapsed, "Refreshed value");
                CachedResult::Value(value)
            }
            Err(error) => {
                tracing::warn!(?elapsed, %error, "Failed to refresh value");
                CachedResult::Error(error)
            }
        };

        self.slot.set(cached, self.config.result_validity);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
