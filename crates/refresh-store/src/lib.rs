//! A single value that keeps itself fresh.
//!
//! A [`Store`] owns a producer function and calls it periodically on a background task. The most
//! recent outcome, whether a value or an error, is kept in an [`ExpiringSlot`] and can be read
//! at any time with [`Store::get`] without waiting on the producer. [`Store::wait`] helps callers
//! that need the first outcome before they can do anything useful.
//!
//! Two ready-made stores are provided on top of the core:
//!
//!  - [`HttpStore`](http::HttpStore) keeps the body of an HTTP resource.
//!  - [`GitRepoStore`](git::GitRepoStore) keeps an up-to-date checkout of a Git repository.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use refresh_store::{Store, StoreConfig, UpdateContext};
//!
//! # async fn example() {
//! let store = Store::new(
//!     |_ctx: UpdateContext| async { Ok::<_, String>(42) },
//!     StoreConfig {
//!         update_interval: Duration::from_secs(10),
//!         update_timeout: Duration::from_secs(5),
//!         ..Default::default()
//!     },
//! );
//!
//! store.wait(Duration::from_secs(30)).await.unwrap();
//! assert_eq!(store.get(), Ok(42));
//! # }
//! ```

#![warn(missing_debug_implementations)]

pub mod config;
pub mod engine;
pub mod error;
pub mod slot;
pub mod store;

#[cfg(feature = "git")]
pub mod git;
#[cfg(feature = "http")]
pub mod http;


pub use config::StoreConfig;
pub use engine::{Producer, UpdateContext};
pub use error::{ConfigError, DeadlineExceeded, StoreError};
pub use slot::ExpiringSlot;
pub use store::{CachedResult, Store};
