//! Pending requests, and the batches they are collected into.

use std::collections::btree_map::{BTreeMap, Entry};

use tokio::sync::oneshot;

use crate::{
    error::{Error, UpstreamError},
    page::{PageId, WikiPage},
    upstream::PageMap,
};

/// The single-use channel a result is delivered through.
pub(crate) type Reply = oneshot::Sender<Result<WikiPage, Error>>;

/// A caller waiting on one page.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) id: PageId,
    reply: Reply,
}

impl PendingRequest {
    pub(crate) fn new(id: PageId) -> (Self, oneshot::Receiver<Result<WikiPage, Error>>) {
        let (reply, receiver) = oneshot::channel();
        (Self { id, reply }, receiver)
    }
}

/// A set of pending requests resolved by a single upstream query.
///
/// Requests for the same page share one key, so the query only ever names
/// each page once. The size of a batch is the number of distinct pages; the
/// page is cloned for every waiter past the first. In the common case of no
/// duplicates, no clones occur.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    replies: BTreeMap<PageId, Vec<Reply>>,
    requests: usize,
}

impl Batch {
    /// Add a request to this batch, unless it would take the batch past
    /// `max_keys` distinct pages; in that case the request is handed back.
    /// A request for a page that's already in the batch always fits.
    pub(crate) fn push(&mut self, request: PendingRequest, max_keys: usize) -> Result<(), PendingRequest> {
        let keys = self.replies.len();

        match self.replies.entry(request.id) {
            Entry::Occupied(mut entry) => entry.get_mut().push(request.reply),
            Entry::Vacant(_) if keys >= max_keys => return Err(request),
            Entry::Vacant(entry) => {
                entry.insert(vec![request.reply]);
            }
        }

        self.requests += 1;
        Ok(())
    }

    /// Number of distinct pages in this batch
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.replies.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Number of requests, duplicates included
    #[inline]
    pub(crate) fn requests(&self) -> usize {
        self.requests
    }

    /// The distinct page ids in this batch, in ascending order.
    pub(crate) fn ids(&self) -> Vec<PageId> {
        self.replies.keys().copied().collect()
    }

    /// Deliver the outcome of this batch's query to every request in it.
    ///
    /// On success each request gets its page, or [`Error::NotFound`] if the
    /// upstream didn't return it. On failure every request gets the same
    /// error. Sending never blocks; results for callers that stopped
    /// waiting are dropped and counted as abandoned.
    pub(crate) fn fan_out(self, result: Result<PageMap, UpstreamError>) -> Delivery {
        let mut delivery = Delivery::default();

        match result {
            Ok(mut pages) => {
                for (id, replies) in self.replies {
                    let outcome = pages.remove(&id).ok_or(Error::NotFound(id));
                    delivery.send_all(replies, outcome);
                }
            }
            Err(err) => {
                let err = Error::from(err);
                for (_, replies) in self.replies {
                    delivery.send_all(replies, Err(err.clone()));
                }
            }
        }

        delivery
    }
}

/// Counts from one [`Batch::fan_out`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) delivered: usize,
    pub(crate) abandoned: usize,
}

impl Delivery {
    fn send_all(&mut self, mut replies: Vec<Reply>, outcome: Result<WikiPage, Error>) {
        let last = replies.pop();

        for reply in replies {
            self.send(reply, outcome.clone());
        }

        if let Some(reply) = last {
            self.send(reply, outcome);
        }
    }

    fn send(&mut self, reply: Reply, outcome: Result<WikiPage, Error>) {
        match reply.send(outcome) {
            Ok(()) => self.delivered += 1,
            Err(_) => self.abandoned += 1,
        }
    }
}
