//! Configuration for a [`RequestHandler`](crate::RequestHandler).

use std::{env, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::{error::ConfigError, retry::RetryPolicy};

/// Settings shared by every handler a [`Registry`](crate::Registry) creates.
///
/// The defaults follow the Wikipedia API rules: at most 20 extracts per
/// query and a modest request rate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Most distinct pages fetched by one upstream query.
    pub max_batch_size: usize,

    /// How long the collector waits for more requests before sending a
    /// batch that is smaller than the current estimate.
    #[serde(with = "duration_ms")]
    pub collection_window: Duration,

    /// Capacity of the pending request queue. Callers wait for space when
    /// it's full.
    pub queue_capacity: usize,

    pub rate_per_second: f64,
    pub burst: u32,

    pub retry: RetryPolicy,

    /// Bound on the time spent on one batch, retries included. `None`
    /// means the batch is bounded only by the retry ceiling.
    #[serde(with = "duration_ms::option")]
    pub batch_deadline: Option<Duration>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            collection_window: Duration::from_secs(1),
            queue_capacity: 1024,
            rate_per_second: 150.0,
            burst: 1,
            retry: RetryPolicy::default(),
            batch_deadline: None,
        }
    }
}

impl HandlerConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_collection_window(mut self, window: Duration) -> Self {
        self.collection_window = window;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_rate(mut self, rate_per_second: f64, burst: u32) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst = burst;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.batch_deadline = deadline;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field| Err(ConfigError::Zero { field });

        if self.max_batch_size == 0 {
            return zero("max_batch_size");
        }
        if self.queue_capacity == 0 {
            return zero("queue_capacity");
        }
        if self.rate_per_second.is_nan() || self.rate_per_second <= 0.0 {
            return zero("rate_per_second");
        }
        if self.burst == 0 {
            return zero("burst");
        }
        if self.retry.base.is_zero() {
            return zero("retry.base");
        }
        // A multiplier of 1 would retry forever at the base interval
        if self.retry.multiplier < 2 {
            return Err(ConfigError::InvalidVar {
                var: String::from("retry.multiplier"),
                value: self.retry.multiplier.to_string(),
            });
        }
        Ok(())
    }

    /// Defaults, overridden by any `WIKIPAGE_*` variables in the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "WIKIPAGE_MAX_BATCH_SIZE")? {
            config.max_batch_size = v;
        }
        if let Some(ms) = parse(&lookup, "WIKIPAGE_COLLECTION_WINDOW_MS")? {
            config.collection_window = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "WIKIPAGE_QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(v) = parse(&lookup, "WIKIPAGE_RATE_PER_SECOND")? {
            config.rate_per_second = v;
        }
        if let Some(v) = parse(&lookup, "WIKIPAGE_BURST")? {
            config.burst = v;
        }
        if let Some(ms) = parse(&lookup, "WIKIPAGE_RETRY_BASE_MS")? {
            config.retry.base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "WIKIPAGE_RETRY_CEILING_MS")? {
            config.retry.ceiling = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "WIKIPAGE_BATCH_DEADLINE_MS")? {
            config.batch_deadline = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::InvalidVar {
                var: var.to_owned(),
                value,
            }),
        },
    }
}

/// Serde helpers for durations written as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub(crate) mod option {
        use super::*;

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}
