//! Groups pending requests into batches sized by recent demand.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{
    batch::{Batch, PendingRequest},
    clock::Clock,
};

/// Moving average of recent batch sizes, weighted 7:9 toward the most
/// recent batch and rounded to the nearest integer.
///
/// Under light load it settles at 1, so a lone request is sent as soon as
/// it arrives. Under sustained load it climbs toward the number of requests
/// arriving per window, and the collector waits for that many before
/// sending. A single spike moves it a little over half way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Estimator(usize);

impl Default for Estimator {
    fn default() -> Self {
        Estimator(1)
    }
}

impl Estimator {
    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.0
    }

    /// The number of pages to wait for in the next batch. Never zero.
    pub(crate) fn target(&self, max_keys: usize) -> usize {
        self.0.clamp(1, max_keys.max(1))
    }

    /// Fold the size of a closed batch into the estimate. The estimate only
    /// reaches zero after empty batches.
    pub(crate) fn observe(&mut self, collected: usize) -> usize {
        self.0 = (7 * self.0 + 9 * collected + 8) / 16;
        self.0
    }
}

/// Drains the pending request queue into batches. Owned by the (single)
/// running collector task for as long as it is awake.
pub(crate) struct Collector<'a> {
    queue: &'a mut mpsc::Receiver<PendingRequest>,
    clock: &'a dyn Clock,
    window: Duration,
    max_keys: usize,
    estimator: Estimator,

    // A request that didn't fit in the previous batch. It starts the next one.
    carry: Option<PendingRequest>,
}

impl<'a> Collector<'a> {
    pub(crate) fn new(
        queue: &'a mut mpsc::Receiver<PendingRequest>,
        clock: &'a dyn Clock,
        window: Duration,
        max_keys: usize,
    ) -> Self {
        Self {
            queue,
            clock,
            window,
            max_keys,
            estimator: Estimator::default(),
            carry: None,
        }
    }

    #[inline]
    pub(crate) fn estimate(&self) -> usize {
        self.estimator.get()
    }

    /// Start over from an estimate of 1, as a freshly woken collector would.
    pub(crate) fn restart(&mut self) {
        self.estimator = Estimator::default();
    }

    /// True if there is nothing left to collect right now.
    pub(crate) fn is_drained(&self) -> bool {
        self.carry.is_none() && self.queue.is_empty()
    }

    /// Add `request` to `batch`, or keep it for the next batch if `batch` is
    /// full. Returns false if the batch is full.
    fn add(&mut self, batch: &mut Batch, request: PendingRequest) -> bool {
        match batch.push(request, self.max_keys) {
            Ok(()) => true,
            Err(request) => {
                self.carry = Some(request);
                false
            }
        }
    }

    /// Collect the next batch. It is empty only if nothing arrived during a
    /// whole collection window.
    ///
    /// - Take what is already queued, up to the target size.
    /// - If that's short of the target, wait for more until the target is
    ///   reached or the window closes.
    /// - Top the batch up, without waiting, with whatever else is already
    ///   queued, up to the maximum size. This is how the estimate learns
    ///   that demand has grown.
    pub(crate) async fn next_batch(&mut self) -> Batch {
        let target = self.estimator.target(self.max_keys);
        let mut batch = Batch::default();

        if let Some(request) = self.carry.take() {
            self.add(&mut batch, request);
        }

        while batch.len() < target {
            match self.queue.try_recv() {
                Ok(request) => {
                    if !self.add(&mut batch, request) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        if batch.len() < target {
            let mut window = self.clock.sleep(self.window);

            while batch.len() < target {
                tokio::select! {
                    biased;

                    request = self.queue.recv() => match request {
                        Some(request) => {
                            if !self.add(&mut batch, request) {
                                break;
                            }
                        }
                        None => break,
                    },
                    () = &mut window => break,
                }
            }
        }

        if self.carry.is_none() {
            while let Ok(request) = self.queue.try_recv() {
                if !self.add(&mut batch, request) {
                    break;
                }
            }
        }

        let estimate = self.estimator.observe(batch.len());
        trace!(
            keys = batch.len(),
            requests = batch.requests(),
            target,
            estimate,
            "batch closed"
        );

        batch
    }
}
