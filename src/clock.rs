//! The time source used by the retry loop, the batch deadline and the batch
//! collection window.
//!
//! Backoff and collection waits go through a [`Clock`], so that retry
//! behaviour can be tested without real delays: [`ManualClock`] completes
//! every sleep instantly and records it. The rate limiter keeps its own
//! clock.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::future::{BoxFuture, FutureExt};
use futures_timer::Delay;

pub trait Clock: Debug + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Create a future that completes once `duration` has passed. The
    /// returned future must not borrow the clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock time, with runtime-agnostic timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Delay::new(duration).boxed()
    }
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// A virtual clock. Sleeping advances virtual time by the requested amount
/// the first time the sleep future is polled, and completes immediately.
/// A sleep that is never polled (for instance, the losing branch of a
/// `select!`) leaves the clock untouched.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().unwrap().elapsed += duration;
    }

    /// Total virtual time since this clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap().elapsed
    }

    /// Every sleep that has completed, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let state = Arc::clone(&self.state);
        async move {
            let mut state = state.lock().unwrap();
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        .boxed()
    }
}
