//! The request handler: turns many concurrent single-page lookups into a
//! few batched upstream queries.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    batch::{Batch, PendingRequest},
    clock::{Clock, SystemClock},
    collector::{Collector, Estimator},
    config::HandlerConfig,
    error::{ConfigError, Error, UpstreamError},
    executor::BatchExecutor,
    limiter::RateLimiter,
    page::{PageId, WikiPage},
    upstream::{TitleLookup, Upstream},
};

/// A hub from which pages of one namespace (one language edition) are
/// retrieved.
///
/// `RequestHandler` is cheap to clone; clones share the same queue, rate
/// limiter and collector. It must be used from within a Tokio runtime,
/// because the first [`resolve`](Self::resolve) after a quiet period spawns
/// the background task that collects and sends batches.
pub struct RequestHandler<U: Upstream> {
    shared: Arc<Shared<U>>,
}

impl<U: Upstream> Clone for RequestHandler<U> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<U: Upstream> Debug for RequestHandler<U> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("namespace", &self.shared.namespace)
            .field("upstream", &"<upstream>")
            .field("stats", &self.stats())
            .finish()
    }
}

/// A snapshot of a handler's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Queries sent upstream, retries included
    pub queries: u64,
    /// Batches executed, whatever their outcome
    pub batches: u64,
    /// Results received by a waiting caller
    pub delivered: u64,
    /// Results produced for callers that had already stopped waiting
    pub abandoned: u64,
    /// The collector's current batch size estimate
    pub estimate: usize,
    /// Whether a collector task is running
    pub active: bool,
}

struct Shared<U: Upstream> {
    namespace: String,
    config: HandlerConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,

    sender: mpsc::Sender<PendingRequest>,
    // Locked by the collector task for as long as it runs
    queue: Mutex<mpsc::Receiver<PendingRequest>>,

    // Set while a collector task is running. Only the task that flips it
    // from false to true may spawn a collector.
    active: AtomicBool,

    executor: BatchExecutor<U>,

    estimate: AtomicUsize,
    batches: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
}

impl<U: Upstream> RequestHandler<U> {
    pub fn new(
        namespace: impl Into<String>,
        upstream: Arc<U>,
        config: HandlerConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(namespace, upstream, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        namespace: impl Into<String>,
        upstream: Arc<U>,
        config: HandlerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let namespace = namespace.into();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let shutdown = CancellationToken::new();

        let limiter = RateLimiter::new(config.rate_per_second, config.burst)?;
        let executor = BatchExecutor::new(
            namespace.clone(),
            upstream,
            limiter,
            config.retry.clone(),
            config.batch_deadline,
            Arc::clone(&clock),
            shutdown.clone(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                namespace,
                config,
                clock,
                shutdown,
                sender,
                queue: Mutex::new(receiver),
                active: AtomicBool::new(false),
                executor,
                estimate: AtomicUsize::new(Estimator::default().get()),
                batches: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.shared.config
    }

    /// Fetch a single page. Safe to call from any number of tasks at once;
    /// concurrent calls are batched together.
    ///
    /// Returns [`Error::NotFound`] if the upstream has no such page, and
    /// [`Error::Cancelled`] as soon as `cancel` fires. A cancelled request
    /// may still be sent upstream as part of a batch; its result is
    /// discarded.
    ///
    /// Warning: if the upstream keeps failing, a batch is retried for as
    /// long as the retry policy allows (see [`RetryPolicy::worst_case`],
    /// about 73 hours with the defaults). Callers should supply their own
    /// deadline, or configure a batch deadline.
    ///
    /// [`RetryPolicy::worst_case`]: crate::RetryPolicy::worst_case
    pub async fn resolve(&self, cancel: &CancellationToken, id: PageId) -> Result<WikiPage, Error> {
        if self.shared.shutdown.is_cancelled() {
            return Err(UpstreamError::Shutdown.into());
        }

        let (request, response) = PendingRequest::new(id);

        tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(Error::Cancelled),
            sent = self.shared.sender.send(request) => {
                // The handler owns the receiver, so the queue can't close
                if sent.is_err() {
                    return Err(UpstreamError::Shutdown.into());
                }
            }
        }

        self.wake();

        tokio::select! {
            biased;

            result = response => result.unwrap_or_else(|_| Err(UpstreamError::Shutdown.into())),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// [`resolve`](Self::resolve), giving up with [`Error::Cancelled`] after
    /// `timeout`.
    pub async fn resolve_timeout(&self, id: PageId, timeout: Duration) -> Result<WikiPage, Error> {
        let never = CancellationToken::new();

        tokio::select! {
            biased;

            result = self.resolve(&never, id) => result,
            () = self.shared.clock.sleep(timeout) => Err(Error::Cancelled),
        }
    }

    /// Stop talking to the upstream. Batches in flight, and any requests
    /// made afterwards, fail with [`UpstreamError::Shutdown`] (or
    /// [`UpstreamError::RateLimitCancelled`] if they were waiting on the
    /// rate limiter).
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn stats(&self) -> HandlerStats {
        let shared = &self.shared;

        HandlerStats {
            queries: shared.executor.queries(),
            batches: shared.batches.load(Ordering::Relaxed),
            delivered: shared.delivered.load(Ordering::Relaxed),
            abandoned: shared.abandoned.load(Ordering::Relaxed),
            estimate: shared.estimate.load(Ordering::Relaxed),
            active: shared.active.load(Ordering::SeqCst),
        }
    }

    /// Make sure a collector is running.
    fn wake(&self) {
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(namespace = %self.shared.namespace, "waking collector");
            tokio::spawn(Arc::clone(&self.shared).collect());
        }
    }
}

impl<U: TitleLookup> RequestHandler<U> {
    /// Fetch a single page by title. Title lookups aren't batched, but they
    /// go through the same rate limiter and retry policy as everything else.
    ///
    /// Returns [`Error::TitleNotFound`] if there's no page with that title.
    /// The same warning about retries as for [`resolve`](Self::resolve)
    /// applies.
    pub async fn resolve_title(
        &self,
        cancel: &CancellationToken,
        title: &str,
    ) -> Result<WikiPage, Error> {
        if self.shared.shutdown.is_cancelled() {
            return Err(UpstreamError::Shutdown.into());
        }

        let result = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.shared.executor.execute_title(title) => result,
        };

        match result {
            Ok(Some(page)) => Ok(page),
            Ok(None) => Err(Error::TitleNotFound(title.to_owned())),
            Err(err) => {
                warn!(
                    namespace = %self.shared.namespace,
                    title,
                    error = %err,
                    "title lookup failed"
                );
                Err(err.into())
            }
        }
    }
}

impl<U: Upstream> Shared<U> {
    /// The collector task. Runs batches until a whole collection window
    /// passes with its estimate decaying to zero, then goes to sleep.
    async fn collect(self: Arc<Self>) {
        let mut queue = self.queue.lock().await;
        let mut collector = Collector::new(
            &mut queue,
            &*self.clock,
            self.config.collection_window,
            self.config.max_batch_size,
        );

        loop {
            let batch = collector.next_batch().await;
            self.estimate.store(collector.estimate(), Ordering::Relaxed);

            if !batch.is_empty() {
                self.dispatch(batch).await;
                continue;
            }

            if collector.estimate() > 0 {
                continue;
            }

            // A resolve that enqueues after the check below sees `active`
            // unset and spawns a new collector; one that enqueued before it
            // is picked up by this one.
            self.active.store(false, Ordering::SeqCst);
            if collector.is_drained()
                || self
                    .active
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                debug!(namespace = %self.namespace, "collector going to sleep");
                return;
            }

            collector.restart();
        }
    }

    async fn dispatch(&self, batch: Batch) {
        let ids = batch.ids();
        let result = self.executor.execute(&ids).await;

        if let Err(err) = &result {
            warn!(
                namespace = %self.namespace,
                pages = ids.len(),
                requests = batch.requests(),
                error = %err,
                "batch failed"
            );
        }

        let delivery = batch.fan_out(result);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.abandoned
            .fetch_add(delivery.abandoned as u64, Ordering::Relaxed);
    }
}
