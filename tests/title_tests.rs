//! These tests ensure that title lookups share the handler's rate limit
//! and retry policy, and report missing titles as such.

mod common;

use std::{sync::Arc, time::Duration};

use common::{expected_page, test_config, FakeUpstream};
use wikipage::{CancellationToken, Error, RequestHandler, UpstreamError};

fn handler(upstream: &Arc<FakeUpstream>) -> RequestHandler<FakeUpstream> {
    RequestHandler::new("en", Arc::clone(upstream), test_config()).unwrap()
}

#[tokio::test]
async fn title_lookup_finds_the_page() {
    let upstream = Arc::new(FakeUpstream::new());
    let handler = handler(&upstream);

    let page = handler
        .resolve_title(&CancellationToken::new(), "Anarchism")
        .await
        .unwrap();
    assert_eq!(Some(page), expected_page(12));

    let recorded = upstream.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].namespace, "en");
    assert_eq!(recorded[0].title.as_deref(), Some("Anarchism"));

    // Sent on its own, without waking the collector
    let stats = handler.stats();
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.batches, 0);
    assert!(!stats.active);
}

#[tokio::test]
async fn missing_title_carries_the_title() {
    let upstream = Arc::new(FakeUpstream::new());
    let handler = handler(&upstream);

    let err = handler
        .resolve_title(&CancellationToken::new(), "Nowhere at all")
        .await
        .unwrap_err();

    assert_eq!(err.missing_title(), Some("Nowhere at all"));
    assert_eq!(err.not_found(), None);
    assert_eq!(err.to_string(), r#"page "Nowhere at all" wasn't found"#);

    // Not found is an answer, not a failure
    assert_eq!(upstream.queries(), 1);
}

#[tokio::test]
async fn failed_title_lookup_is_retried() {
    let upstream = Arc::new(FakeUpstream::new().failing_first(2));
    let handler = handler(&upstream);

    let page = handler
        .resolve_title(&CancellationToken::new(), "Anarchism")
        .await
        .unwrap();

    assert_eq!(page.id, 12);
    assert_eq!(upstream.queries(), 3);
    assert_eq!(handler.stats().queries, 3);
}

#[tokio::test]
async fn cancelled_title_lookup_returns_promptly() {
    let upstream = Arc::new(FakeUpstream::new().with_delay(Duration::from_secs(1)));
    let handler = handler(&upstream);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = handler.resolve_title(&cancel, "Anarchism").await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn title_lookup_after_shutdown_fails() {
    let upstream = Arc::new(FakeUpstream::new());
    let handler = handler(&upstream);
    handler.shutdown();

    match handler.resolve_title(&CancellationToken::new(), "Anarchism").await {
        Err(Error::Upstream(err)) => assert!(matches!(*err, UpstreamError::Shutdown)),
        other => panic!("expected shutdown, got {:?}", other),
    }
    assert_eq!(upstream.queries(), 0);
}
