use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Interval used when [`StoreConfig::update_interval`] is zero.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Timeout used when [`StoreConfig::update_timeout`] is zero.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(50);

/// The longest accepted [`StoreConfig::update_interval`].
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Controls how often a [`Store`](crate::Store) refreshes its value and for how long a refreshed
/// value may be served.
///
/// All fields accept human readable durations when deserialized, such as `30s` or `5m`. Zero
/// values for the interval and the timeout are replaced by their defaults once the store is
/// created.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// How frequently the producer is called.
    ///
    /// Defaults to 60 seconds.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,

    /// The deadline handed to every producer call.
    ///
    /// Must not be longer than the update interval. Defaults to 50 seconds.
    #[serde(with = "humantime_serde")]
    pub update_timeout: Duration,

    /// How long a refreshed result stays valid.
    ///
    /// Once this has elapsed without a newer result, [`Store::get`](crate::Store::get) reports
    /// the value as expired. This should be several multiples of the update interval so that
    /// individual updates are allowed to fail.
    ///
    /// Zero, the default, means that results never expire.
    #[serde(with = "humantime_serde")]
    pub result_validity: Duration,
}

impl StoreConfig {
    /// Fills in defaults for zero durations and checks the result.
    ///
    /// Returns [`ConfigError::TimeoutExceedsInterval`] if a single update may run for longer than
    /// the period between updates, and [`ConfigError::IntervalTooLong`] if the interval exceeds
    /// [`MAX_UPDATE_INTERVAL`].
    pub fn validate(self) -> Result<Self, ConfigError> {
        let mut config = self;

        if config.update_interval.is_zero() {
            config.update_interval = DEFAULT_UPDATE_INTERVAL;
        }
        if config.update_timeout.is_zero() {
            config.update_timeout = DEFAULT_UPDATE_TIMEOUT;
        }

        if config.update_interval > MAX_UPDATE_INTERVAL {
            return Err(ConfigError::IntervalTooLong {
                interval: config.update_interval,
                max: MAX_UPDATE_INTERVAL,
            });
        }

        if config.update_timeout > config.update_interval {
            return Err(ConfigError::TimeoutExceedsInterval {
                timeout: config.update_timeout,
                interval: config.update_interval,
            });
        }

        Ok(config)
    }
}
