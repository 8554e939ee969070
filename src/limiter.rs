//! A token bucket rate limiter shared by every query a handler sends.

use std::{
    fmt::{self, Debug, Formatter},
    num::NonZeroU32,
    time::Duration,
};

use governor::{DefaultDirectRateLimiter, Quota};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, UpstreamError};

/// The quota allowing `rate` operations per second, in bursts of up to
/// `burst`. Fractional rates are fine: 0.5 is one operation every two
/// seconds.
pub(crate) fn quota(rate: f64, burst: u32) -> Result<Quota, ConfigError> {
    let invalid = || ConfigError::InvalidVar {
        var: String::from("rate_per_second"),
        value: rate.to_string(),
    };

    if !rate.is_finite() || rate <= 0.0 {
        return Err(invalid());
    }

    let burst = NonZeroU32::new(burst).ok_or(ConfigError::Zero { field: "burst" })?;
    let period = Duration::try_from_secs_f64(1.0 / rate).map_err(|_| invalid())?;

    Ok(Quota::with_period(period).ok_or_else(invalid)?.allow_burst(burst))
}

/// Grants at most `rate` operations per second, with bursts of up to
/// `burst` operations.
pub struct RateLimiter {
    rate: f64,
    burst: u32,
    limiter: DefaultDirectRateLimiter,
}

impl Debug for RateLimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(rate: f64, burst: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            rate,
            burst,
            limiter: governor::RateLimiter::direct(quota(rate, burst)?),
        })
    }

    /// Wait until a token is available. Fails with
    /// [`UpstreamError::RateLimitCancelled`] if `cancel` fires first; a
    /// cancelled waiter never takes a token.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), UpstreamError> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(UpstreamError::RateLimitCancelled),
            () = self.limiter.until_ready() => Ok(()),
        }
    }
}
