//! Exponential backoff for failed batch attempts.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::config::duration_ms;

/// How a failed batch is retried.
///
/// The interval starts at `base` and is multiplied by `multiplier` after
/// every failure; retries stop once the interval reaches `ceiling`. The
/// actual wait before each retry is drawn uniformly from `[0, interval)`,
/// so that handlers failing at the same moment don't retry in lockstep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "duration_ms")]
    pub base: Duration,
    pub multiplier: u32,
    #[serde(with = "duration_ms")]
    pub ceiling: Duration,
    /// From this interval on, the upstream is asked to drop its idle
    /// connections before the retry.
    #[serde(with = "duration_ms")]
    pub reset_threshold: Duration,
    /// Intervals longer than this are logged at `warn` level.
    #[serde(with = "duration_ms")]
    pub warn_threshold: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            multiplier: 2,
            ceiling: Duration::from_secs(48 * 60 * 60),
            reset_threshold: Duration::from_secs(60),
            warn_threshold: Duration::from_secs(60 * 60),
        }
    }
}

/// One step of a [`RetryPolicy`]: the interval the retry delay is drawn
/// from, and the side effects that go with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub interval: Duration,
    pub reset_connections: bool,
    pub warn: bool,
}

/// Iterator over the backoff steps of a [`RetryPolicy`]; see
/// [`RetryPolicy::intervals`].
#[derive(Debug, Clone)]
pub struct Intervals<'a> {
    policy: &'a RetryPolicy,
    next: Duration,
}

impl<'a> Iterator for Intervals<'a> {
    type Item = Backoff;

    fn next(&mut self) -> Option<Backoff> {
        let interval = self.next;
        if interval >= self.policy.ceiling || interval.is_zero() {
            return None;
        }

        self.next = interval.saturating_mul(self.policy.multiplier);
        Some(Backoff {
            interval,
            reset_connections: interval >= self.policy.reset_threshold,
            warn: interval > self.policy.warn_threshold,
        })
    }
}

impl RetryPolicy {
    /// The backoff steps this policy allows, one per retry. A batch gets
    /// one attempt more than there are steps.
    pub fn intervals(&self) -> Intervals<'_> {
        Intervals {
            policy: self,
            next: self.base,
        }
    }

    /// Pick the actual delay for a step, uniformly in `[0, interval)`.
    pub fn jitter<R: Rng + ?Sized>(&self, interval: Duration, rng: &mut R) -> Duration {
        let nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }

        Duration::from_nanos(rng.gen_range(0..nanos))
    }

    /// Upper bound on the total time spent sleeping between attempts.
    pub fn worst_case(&self) -> Duration {
        self.intervals()
            .fold(Duration::ZERO, |total, step| total.saturating_add(step.interval))
    }
}
