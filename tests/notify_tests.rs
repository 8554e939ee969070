//! These tests ensure that the collector goes to sleep when there's nothing
//! to do, that the next request wakes it, and that there is never more than
//! one collector per handler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, expected_page, test_config, FakeUpstream};
use futures::future;
use wikipage::{CancellationToken, ConfigError, HandlerConfig, PageId, Registry, RequestHandler};

#[tokio::test]
async fn collector_sleeps_when_idle_and_wakes_again() {
    let upstream = Arc::new(FakeUpstream::new());
    let handler = RequestHandler::new("en", Arc::clone(&upstream), test_config()).unwrap();
    let cancel = CancellationToken::new();

    assert!(!handler.stats().active);
    // A fresh handler expects single requests
    assert_eq!(handler.stats().estimate, 1);

    handler.resolve(&cancel, 12).await.unwrap();
    assert!(eventually(|| !handler.stats().active).await);
    assert_eq!(handler.stats().estimate, 0);

    // A new request after the collector went to sleep is still served
    handler.resolve(&cancel, 13).await.unwrap();
    assert!(eventually(|| !handler.stats().active).await);

    assert_eq!(upstream.queries(), 2);
    assert_eq!(handler.stats().batches, 2);
}

#[tokio::test]
async fn requests_racing_with_sleep_are_served() {
    let upstream = Arc::new(FakeUpstream::new());
    let handler = RequestHandler::new(
        "en",
        Arc::clone(&upstream),
        test_config().with_collection_window(Duration::from_millis(1)),
    )
    .unwrap();

    // With a tiny window the collector is always about to go to sleep
    for id in 1..=50 {
        let result = handler
            .resolve_timeout(id, Duration::from_secs(5))
            .await;
        assert_eq!(result.ok(), expected_page(id));

        tokio::time::sleep(Duration::from_millis(id as u64 % 3)).await;
    }

    assert_eq!(upstream.queries(), 50);
}

/// Many tasks on many threads, each making requests in a loop. Batches are
/// only ever sent one at a time, by a single collector.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_collector_runs() {
    let upstream = Arc::new(FakeUpstream::new().with_delay(Duration::from_millis(2)));
    let handler = RequestHandler::new("en", Arc::clone(&upstream), test_config()).unwrap();

    let workers = (0..16).map(|worker: PageId| {
        let handler = handler.clone();
        tokio::spawn(async move {
            for round in 0..20 {
                let id = worker * 100 + round + 1;
                let result = handler.resolve_timeout(id, Duration::from_secs(10)).await;
                assert_eq!(result.ok(), expected_page(id));

                if round % 5 == 0 {
                    // Give the collector a chance to fall asleep
                    tokio::time::sleep(Duration::from_millis(60)).await;
                }
            }
        })
    });

    for result in future::join_all(workers).await {
        result.unwrap();
    }

    assert_eq!(upstream.max_in_flight(), 1);
    assert!(eventually(|| handler.stats().delivered == 320).await);
    assert!(upstream.queries() < 320);
}

#[tokio::test]
async fn registry_loads_or_creates_handlers() {
    let upstream = Arc::new(FakeUpstream::new());
    let registry = Registry::new(Arc::clone(&upstream), test_config()).unwrap();
    assert!(registry.is_empty());

    let english = registry.handler("en").unwrap();
    let again = registry.handler("en").unwrap();
    let italian = registry.handler("it").unwrap();
    assert_eq!(registry.len(), 2);

    english.resolve(&CancellationToken::new(), 12).await.unwrap();

    // Both handles share the same handler
    assert_eq!(again.stats().delivered, 1);
    assert_eq!(italian.stats().delivered, 0);
    assert_eq!(again.namespace(), "en");

    italian.resolve(&CancellationToken::new(), 12).await.unwrap();
    let namespaces: Vec<String> = upstream
        .recorded()
        .into_iter()
        .map(|query| query.namespace)
        .collect();
    assert_eq!(namespaces, vec!["en", "it"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_yields_one_handler() {
    let upstream = Arc::new(FakeUpstream::new());
    let registry = Arc::new(Registry::new(Arc::clone(&upstream), test_config()).unwrap());

    let tasks = (1..=16).map(|id: PageId| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let handler = registry.handler("de").unwrap();
            handler
                .resolve_timeout(id, Duration::from_secs(5))
                .await
                .ok()
        })
    });

    for (id, result) in (1..=16).zip(future::join_all(tasks).await) {
        assert_eq!(result.unwrap(), expected_page(id));
    }

    assert_eq!(registry.len(), 1);
    let handler = registry.handler("de").unwrap();
    assert!(eventually(|| handler.stats().delivered == 16).await);
}

#[test]
fn invalid_config_is_rejected() {
    let upstream = Arc::new(FakeUpstream::new());

    let config = HandlerConfig::default().with_max_batch_size(0);
    let err = Registry::new(Arc::clone(&upstream), config).unwrap_err();
    assert_eq!(
        err,
        ConfigError::Zero {
            field: "max_batch_size"
        }
    );

    let config = HandlerConfig::default().with_rate(0.0, 1);
    assert!(RequestHandler::new("en", upstream, config).is_err());
}
