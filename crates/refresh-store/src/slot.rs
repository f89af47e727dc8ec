//! A single entry with an optional time to live.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

struct Entry<R> {
    result: Arc<R>,
    written: Instant,
    expires: Option<Instant>,
}

impl<R> Entry<R> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| now >= expires)
    }
}

/// Holds exactly one result together with the time it was written.
///
/// Writes replace the whole entry at once, so readers observe either the previous or the new
/// result and never wait for anything but the swap itself.
pub struct ExpiringSlot<R> {
    entry: RwLock<Option<Entry<R>>>,
}

impl<R> ExpiringSlot<R> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            entry: RwLock::new(None),
        }
    }

    /// Overwrites the slot.
    ///
    /// A zero `ttl` means the result never expires. Otherwise [`get`](Self::get) stops returning
    /// it once `ttl` has elapsed since this call. A `ttl` too large to be represented as an
    /// instant is treated like zero.
    pub fn set(&self, result: R, ttl: Duration) {
        let written = Instant::now();
        let expires = if ttl.is_zero() {
            None
        } else {
            written.checked_add(ttl)
        };
        let entry = Entry {
            result: Arc::new(result),
            written,
            expires,
        };

        let previous = self.entry.write().replace(entry);
        // the old result may be arbitrarily large, release it after unlocking
        drop(previous);
    }

    /// Returns the current result, or `None` if the slot was never written or has expired.
    pub fn get(&self) -> Option<Arc<R>> {
        let entry = self.entry.read();
        let entry = entry.as_ref()?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(Arc::clone(&entry.result))
    }

    /// Time since the last write, whether or not that result has expired since.
    pub fn age(&self) -> Option<Duration> {
        let entry = self.entry.read();
        entry.as_ref().map(|entry| entry.written.elapsed())
    }
}

impl<R> Default for ExpiringSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for ExpiringSlot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.entry.read();
        f.debug_struct("ExpiringSlot")
            .field("written", &entry.as_ref().map(|e| e.written))
            .field("expires", &entry.as_ref().and_then(|e| e.expires))
            .finish()
    }
}
