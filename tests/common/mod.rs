//! A fake upstream, and a handler configuration that runs fast enough for
//! tests.

#![allow(dead_code)]

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use wikipage::{
    HandlerConfig, PageId, PageMap, RetryPolicy, TitleLookup, Upstream, UpstreamError, WikiPage,
};

/// The page the fake upstream has for `id`, if any. Page 0 and every
/// multiple of 7 don't exist.
pub fn expected_page(id: PageId) -> Option<WikiPage> {
    if id == 12 {
        return Some(WikiPage::new(
            12,
            "Anarchism",
            "Anarchism is a political philosophy and movement.",
        ));
    }

    if id % 7 == 0 {
        return None;
    }

    let title = format!("ba{}", "na".repeat(id as usize / 10));
    let abstract_text = format!("ba{}", "na".repeat(id as usize % 50));
    Some(WikiPage::new(id, title, abstract_text))
}

/// The page the fake upstream has titled `title`, if any. Only
/// "Anarchism" exists.
pub fn expected_title(title: &str) -> Option<WikiPage> {
    match title {
        "Anarchism" => expected_page(12),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeQuery {
    pub namespace: String,
    pub ids: Vec<PageId>,
    pub title: Option<String>,
}

impl Display for FakeQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.namespace)?;
        if let Some(title) = &self.title {
            return f.write_str(title);
        }
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

/// An in-memory upstream that records every query it sees.
#[derive(Debug, Default)]
pub struct FakeUpstream {
    delay: Duration,
    failure_rate: f64,
    fail_first: AtomicUsize,

    queries: Mutex<Vec<FakeQuery>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    resets: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` to answer each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail this share of queries at random, with a transport error.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    /// Fail the first `count` queries.
    pub fn failing_first(self, count: usize) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<FakeQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Number of distinct pages in each query, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.recorded().iter().map(|query| query.ids.len()).collect()
    }

    /// Most queries that were ever executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Record `query`, wait out the delay, then maybe fail.
    async fn serve(&self, query: &FakeQuery) -> Result<(), UpstreamError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail() {
            return Err(UpstreamError::transport(query.to_string(), "injected failure"));
        }
        Ok(())
    }

    fn should_fail(&self) -> bool {
        let forced = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        forced || (self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate)
    }
}

impl Upstream for FakeUpstream {
    type Query = FakeQuery;

    fn build_query(&self, namespace: &str, ids: &[PageId]) -> FakeQuery {
        FakeQuery {
            namespace: namespace.to_owned(),
            ids: ids.to_vec(),
            title: None,
        }
    }

    async fn execute(&self, query: &FakeQuery) -> Result<PageMap, UpstreamError> {
        self.serve(query).await?;

        Ok(query
            .ids
            .iter()
            .filter_map(|&id| expected_page(id))
            .map(|page| (page.id, page))
            .collect())
    }

    fn reset_connections(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

impl TitleLookup for FakeUpstream {
    fn build_title_query(&self, namespace: &str, title: &str) -> FakeQuery {
        FakeQuery {
            namespace: namespace.to_owned(),
            ids: Vec::new(),
            title: Some(title.to_owned()),
        }
    }

    async fn execute_title(&self, query: &FakeQuery) -> Result<Option<WikiPage>, UpstreamError> {
        self.serve(query).await?;

        Ok(query.title.as_deref().and_then(expected_title))
    }
}

/// Retries every few milliseconds, seven times at most.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(1),
        ceiling: Duration::from_millis(100),
        ..RetryPolicy::default()
    }
}

pub fn test_config() -> HandlerConfig {
    HandlerConfig::default()
        .with_collection_window(Duration::from_millis(50))
        .with_rate(10_000.0, 100)
        .with_retry(fast_retry())
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    condition()
}
