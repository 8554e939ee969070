//! Wikipage retrieves metadata (id, title, plain-text introduction) about
//! Wikipedia articles by page id. It is built for programs that look up
//! pages one at a time, from many tasks at once, against an API that wants
//! few, batched queries and a bounded request rate.
//!
//! ## Overview
//!
//! Callers ask a [`RequestHandler`] for one page at a time with
//! [`resolve`]. The handler queues the request; a background collector
//! drains the queue into batches, sends each batch upstream as a single
//! query, and hands each caller its own page (or [`Error::NotFound`]) from
//! the result. The caller never knows it was batched.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wikipage::{CancellationToken, HandlerConfig, Registry, WikipediaUpstream};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = Arc::new(WikipediaUpstream::new()?);
//! let registry = Registry::new(upstream, HandlerConfig::default())?;
//! let english = registry.handler("en")?;
//!
//! let cancel = CancellationToken::new();
//! match english.resolve(&cancel, 12).await {
//!     Ok(page) => println!("{}: {}", page.title, page.abstract_text),
//!     Err(err) => match err.not_found() {
//!         Some(id) => println!("there is no page {}", id),
//!         None => return Err(err.into()),
//!     },
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A [`Registry`] keeps one handler per namespace (language edition),
//! created on first use. Each handler has its own queue, collector, and
//! rate limiter.
//!
//! ## Batching
//!
//! The collector sizes batches from a moving average of recent demand.
//! With a single caller it sends each request as soon as it arrives. Under
//! load it waits, for up to the configured collection window, until as many
//! requests have arrived as it expects, and takes anything already queued on
//! top of that, up to [`HandlerConfig::max_batch_size`] distinct pages.
//! Requests for the same page within a batch are sent upstream once.
//!
//! When a whole window passes with nothing to do, the collector task exits;
//! the next [`resolve`] starts a new one. At most one collector runs per
//! handler.
//!
//! ## Failures
//!
//! A batch either succeeds as a whole (every caller gets its page or
//! [`Error::NotFound`]) or fails as a whole (every caller gets the same
//! [`Error::Upstream`]). Failed batches are retried with exponential
//! backoff and jitter according to a [`RetryPolicy`]; a not-found page is
//! an answer, not a failure, and is never retried. With the default policy
//! a batch can be retried for days, so callers should bound their wait with
//! a [`CancellationToken`] or [`RequestHandler::resolve_timeout`].
//!
//! Pages can also be looked up by title with
//! [`RequestHandler::resolve_title`]. Titles aren't batched: each one is a
//! query of its own, sharing the handler's rate limit and retry policy.
//!
//! ## Other upstreams
//!
//! The handler talks to the service through the [`Upstream`] trait, which
//! can be implemented for anything that looks pages up in bulk:
//!
//! ```
//! use std::collections::HashMap;
//!
//! use wikipage::{PageId, PageMap, Upstream, UpstreamError, WikiPage};
//!
//! struct InMemory(HashMap<PageId, WikiPage>);
//!
//! impl Upstream for InMemory {
//!     type Query = String;
//!
//!     fn build_query(&self, _namespace: &str, ids: &[PageId]) -> String {
//!         let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
//!         ids.join(",")
//!     }
//!
//!     async fn execute(&self, query: &String) -> Result<PageMap, UpstreamError> {
//!         let mut pages = PageMap::new();
//!         for id in query.split(',') {
//!             let id: PageId = id
//!                 .parse()
//!                 .map_err(|err| UpstreamError::decode(query.as_str(), err))?;
//!
//!             if let Some(page) = self.0.get(&id) {
//!                 pages.insert(id, page.clone());
//!             }
//!         }
//!         Ok(pages)
//!     }
//! }
//! ```
//!
//! [`resolve`]: RequestHandler::resolve

mod batch;
mod clock;
mod collector;
mod config;
mod error;
mod executor;
mod handler;
mod limiter;
mod page;
mod registry;
mod retry;
mod upstream;
mod wikipedia;

#[doc(hidden)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use config::HandlerConfig;
pub use error::{BoxError, ConfigError, Error, UpstreamError};
pub use handler::{HandlerStats, RequestHandler};
pub use limiter::RateLimiter;
pub use page::{PageId, WikiPage};
pub use registry::Registry;
pub use retry::{Backoff, Intervals, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use upstream::{PageMap, TitleLookup, Upstream};
pub use wikipedia::{
    decode_query, decode_summary, DecodeError, WikipediaQuery, WikipediaUpstream, DEFAULT_SITE,
    SUMMARY_NOT_FOUND,
};
