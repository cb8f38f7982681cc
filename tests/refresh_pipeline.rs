//! Orchestrator → scheduler → refresh handler → store, end to end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use newsflow::app::AppContext;
use newsflow::config::Config;
use newsflow::domain::Feed;
use newsflow::orchestrator::BatchSummary;
use newsflow::store::Store;
use newsflow::tasks::{TaskEventKind, TaskFilter, TaskStatus};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEEDS: usize = 5;

fn rss(title: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><item><guid>{title}-1</guid><title>one</title></item><item><guid>{title}-2</guid><title>two</title></item></channel></rss>"#
    )
}

fn context(workers: usize, concurrency: usize) -> AppContext {
    let mut config = Config::default();
    config.refresh.workers = Some(workers);
    config.refresh.concurrency = concurrency;
    AppContext::in_memory(config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_refresh_through_scheduler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/feed/\d+\.xml$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss("Pipeline"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(FEEDS as u64 - 1)
        .mount(&server)
        .await;

    // concurrency above the worker count: the workers stay the hard bound
    let ctx = context(2, 4);
    let mut ids = Vec::new();
    for i in 0..FEEDS - 1 {
        ids.push(
            ctx.store
                .add_feed(&Feed::new(format!("{}/feed/{i}.xml", server.uri())))
                .unwrap(),
        );
    }
    let broken = ctx
        .store
        .add_feed(&Feed::new(format!("{}/broken.xml", server.uri())))
        .unwrap();

    ctx.start().unwrap();
    let mut orchestrator_events = ctx.scheduler.subscribe();
    let mut observed = ctx.scheduler.subscribe();

    let max_running = Arc::new(AtomicUsize::new(0));
    let sampling = Arc::new(AtomicBool::new(true));
    let sampler = {
        let scheduler = ctx.scheduler.clone();
        let max_running = max_running.clone();
        let sampling = sampling.clone();
        tokio::spawn(async move {
            while sampling.load(Ordering::SeqCst) {
                max_running.fetch_max(scheduler.running_count(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut orchestrator = ctx.orchestrator();
    assert_eq!(orchestrator.refresh_all().unwrap(), FEEDS);
    let summary = orchestrator.run_until_idle(&mut orchestrator_events).await;

    sampling.store(false, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            completed: FEEDS - 1,
            failed: 1
        }
    );
    assert!(max_running.load(Ordering::SeqCst) <= 2);
    assert!(max_running.load(Ordering::SeqCst) >= 1);

    let mut started = 0;
    let mut terminal = 0;
    while started + terminal < 2 * FEEDS {
        let event = tokio::time::timeout(Duration::from_secs(5), observed.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event stream closed early");
        match event.kind {
            TaskEventKind::Started => started += 1,
            TaskEventKind::Completed | TaskEventKind::Failed => terminal += 1,
        }
    }
    assert_eq!(started, FEEDS);
    assert_eq!(terminal, FEEDS);

    for id in ids {
        assert_eq!(ctx.store.get_items_by_feed(id).unwrap().len(), 2);
        assert!(ctx.store.get_feed(id).unwrap().unwrap().last_error.is_none());
    }
    let broken_feed = ctx.store.get_feed(broken).unwrap().unwrap();
    assert!(broken_feed.last_error.unwrap().contains("500"));

    let failed = ctx.scheduler.list_tasks(&TaskFilter {
        status: Some(TaskStatus::Failed),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("HTTP 500"));

    assert!(ctx.shutdown(Duration::from_secs(5)).await.unwrap());
    server.verify().await;
}

#[tokio::test]
async fn test_single_feed_refresh_through_orchestrator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("Single")))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = context(1, 1);
    let id = ctx
        .store
        .add_feed(&Feed::new(format!("{}/single.xml", server.uri())))
        .unwrap();

    ctx.start().unwrap();
    let mut events = ctx.scheduler.subscribe();
    let mut orchestrator = ctx.orchestrator();

    let task_id = orchestrator.refresh_feed(id).unwrap();
    let summary = orchestrator.run_until_idle(&mut events).await;

    assert_eq!(summary.completed, 1);
    assert_eq!(
        ctx.scheduler.get_task(&task_id).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        ctx.store.get_feed(id).unwrap().unwrap().title.as_deref(),
        Some("Single")
    );
    assert!(ctx.shutdown(Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn test_hidden_feeds_are_not_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("Visible")))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = context(2, 2);
    let visible_url = format!("{}/visible.xml", server.uri());
    let hidden_url = format!("{}/hidden.xml", server.uri());
    ctx.store.add_feed(&Feed::new(visible_url)).unwrap();
    ctx.store.add_feed(&Feed::new(hidden_url.clone())).unwrap();
    ctx.store.set_feed_visible(&hidden_url, false).unwrap();

    ctx.start().unwrap();
    let mut events = ctx.scheduler.subscribe();
    let mut orchestrator = ctx.orchestrator();

    assert_eq!(orchestrator.refresh_all().unwrap(), 1);
    let summary = orchestrator.run_until_idle(&mut events).await;
    assert_eq!(summary.total(), 1);

    assert!(ctx.shutdown(Duration::from_secs(5)).await.unwrap());
    server.verify().await;
}
