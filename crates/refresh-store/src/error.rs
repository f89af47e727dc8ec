use std::time::Duration;

use thiserror::Error;

/// An error returned when reading from a [`Store`](crate::Store).
///
/// `E` is the error type of the store's producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError<E> {
    /// No update has completed since the store was created.
    #[error("value is not yet set")]
    Unset,
    /// The last result is older than the configured validity window.
    #[error("value has expired")]
    Expired,
    /// [`Store::wait`](crate::Store::wait) gave up before the first update completed.
    #[error("value still unset after {0:?}")]
    StillUnset(Duration),
    /// The last completed update failed.
    ///
    /// This carries the producer's error unchanged.
    #[error("{0}")]
    Producer(E),
}

impl<E> StoreError<E> {
    /// Returns `true` if no update has completed yet.
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset | Self::StillUnset(_))
    }

    /// Returns the producer error, if this is one.
    pub fn producer_error(&self) -> Option<&E> {
        match self {
            Self::Producer(err) => Some(err),
            _ => None,
        }
    }
}

/// An invalid [`StoreConfig`](crate::StoreConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("update timeout ({timeout:?}) cannot be longer than update interval ({interval:?})")]
    TimeoutExceedsInterval {
        timeout: Duration,
        interval: Duration,
    },
    #[error("update interval ({interval:?}) cannot be longer than {max:?}")]
    IntervalTooLong { interval: Duration, max: Duration },
}

/// The deadline of an update passed, or the store was shut down, before a future completed.
///
/// See [`UpdateContext::run`](crate::UpdateContext::run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("update deadline exceeded")]
pub struct DeadlineExceeded;
