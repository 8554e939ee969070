//! Runs queries against the upstream: rate limiting, retries, backoff.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::UpstreamError,
    limiter::RateLimiter,
    page::{PageId, WikiPage},
    retry::RetryPolicy,
    upstream::{PageMap, TitleLookup, Upstream},
};

pub(crate) struct BatchExecutor<U> {
    namespace: String,
    upstream: Arc<U>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    deadline: Option<Duration>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    queries: AtomicU64,
}

fn deadline_exceeded(attempts: u32, last: Option<UpstreamError>) -> UpstreamError {
    UpstreamError::DeadlineExceeded {
        attempts,
        last: last.map(Box::new),
    }
}

impl<U: Upstream> BatchExecutor<U> {
    pub(crate) fn new(
        namespace: String,
        upstream: Arc<U>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        deadline: Option<Duration>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            namespace,
            upstream,
            limiter,
            policy,
            deadline,
            clock,
            shutdown,
            queries: AtomicU64::new(0),
        }
    }

    /// Number of queries sent upstream so far, retries included.
    pub(crate) fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Fetch `ids` with a single query, retrying the whole query until it
    /// succeeds, the retry policy is exhausted, the batch deadline passes,
    /// or the handler is shut down.
    ///
    /// Ids absent from the returned map were not found; that is a valid
    /// answer and is never retried.
    pub(crate) async fn execute(&self, ids: &[PageId]) -> Result<PageMap, UpstreamError> {
        let query = self.upstream.build_query(&self.namespace, ids);
        let query = &query;

        self.run(query, move || self.upstream.execute(query)).await
    }

    /// Send `query` with `send` until it succeeds or can't be retried.
    ///
    /// The batch deadline covers everything: waiting for the rate limiter,
    /// the attempts themselves, and the backoff between them.
    async fn run<T, F, Fut>(&self, query: &U::Query, mut send: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let deadline = self.deadline.map(|deadline| self.clock.now() + deadline);
        let mut expired: BoxFuture<'static, ()> = match self.deadline {
            Some(deadline) => self.clock.sleep(deadline),
            None => future::pending().boxed(),
        };

        let mut intervals = self.policy.intervals();
        let mut attempts: u32 = 0;
        let mut last = None;

        loop {
            attempts += 1;

            let outcome = tokio::select! {
                biased;

                outcome = self.attempt(&mut send) => outcome,
                () = &mut expired => return Err(deadline_exceeded(attempts, last)),
            };

            let err = match outcome {
                Ok(found) => return Ok(found),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            debug!(namespace = %self.namespace, attempts, error = %err, "upstream query failed");

            let step = match intervals.next() {
                Some(step) => step,
                None => return Err(err),
            };

            if step.reset_connections {
                debug!(namespace = %self.namespace, "resetting upstream connections");
                self.upstream.reset_connections();
            }

            if step.warn {
                warn!(
                    namespace = %self.namespace,
                    %query,
                    error = %err,
                    next_retry_within = ?step.interval,
                    "upstream keeps failing"
                );
            }

            let delay = self.policy.jitter(step.interval, &mut rand::thread_rng());

            if let Some(deadline) = deadline {
                // No point sleeping if the retry would start after the deadline
                if self.clock.now() + delay >= deadline {
                    return Err(deadline_exceeded(attempts, Some(err)));
                }
            }
            last = Some(err);

            tokio::select! {
                biased;

                () = self.clock.sleep(delay) => {}
                () = self.shutdown.cancelled() => return Err(UpstreamError::Shutdown),
                () = &mut expired => return Err(deadline_exceeded(attempts, last)),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, send: &mut F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.limiter.wait(&self.shutdown).await?;
        self.queries.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            biased;

            result = send() => result,
            () = self.shutdown.cancelled() => Err(UpstreamError::Shutdown),
        }
    }
}

impl<U: TitleLookup> BatchExecutor<U> {
    /// Fetch the page titled `title`, with the same rate limiting, retries
    /// and deadline as a batch. `Ok(None)` means there is no such page.
    pub(crate) async fn execute_title(
        &self,
        title: &str,
    ) -> Result<Option<WikiPage>, UpstreamError> {
        let query = self.upstream.build_title_query(&self.namespace, title);
        let query = &query;

        self.run(query, move || self.upstream.execute_title(query)).await
    }
}
