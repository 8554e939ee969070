//! The interface between a [`RequestHandler`](crate::RequestHandler) and the
//! service that actually holds the pages.

use std::{collections::HashMap, fmt::Display, future::Future};

use crate::{
    error::UpstreamError,
    page::{PageId, WikiPage},
};

/// The pages returned by one upstream query, by id. A requested id that is
/// missing from this map was not found.
pub type PageMap = HashMap<PageId, WikiPage>;

/// A service that can look up many pages in one query.
///
/// Implementations must report a uniform outcome for the whole query:
/// either a [`PageMap`] (possibly missing some of the requested ids), or a
/// single error. Never a partial success mixed with a transport failure.
pub trait Upstream: Send + Sync + 'static {
    /// A prepared query. Displayed in logs and error messages.
    type Query: Display + Send + Sync;

    /// Build the query for a set of ids in a namespace. `ids` are unique
    /// and sorted. This must be pure; the same query may be executed
    /// several times when retrying.
    fn build_query(&self, namespace: &str, ids: &[PageId]) -> Self::Query;

    /// Run a query.
    fn execute(
        &self,
        query: &Self::Query,
    ) -> impl Future<Output = Result<PageMap, UpstreamError>> + Send;

    /// Drop any pooled connections. Called before long retry intervals, in
    /// case the failures are caused by a stale connection.
    fn reset_connections(&self) {}
}

/// An upstream that can also look up a single page by its title.
///
/// Title lookups are not batched, but they share the handler's rate limiter
/// and retry policy with batched queries.
pub trait TitleLookup: Upstream {
    /// Build the query for the page titled `title` in a namespace.
    fn build_title_query(&self, namespace: &str, title: &str) -> Self::Query;

    /// Run a title query. `Ok(None)` means there is no such page.
    fn execute_title(
        &self,
        query: &Self::Query,
    ) -> impl Future<Output = Result<Option<WikiPage>, UpstreamError>> + Send;
}
