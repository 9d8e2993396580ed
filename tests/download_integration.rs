//! Integration tests for the download worker.
//!
//! Landing pages and transfer endpoints are served by wiremock; the
//! cancellation test uses a raw trickle server so the transfer stays open.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fsqd_core::download::{
    DownloadError, Downloader, DownloaderConfig, FormLinkResolver, HttpClient, LinkResolver,
    RetryPolicy,
};
use fsqd_core::hub::{HubConfig, HubEvent, NotificationHub, Observer};
use fsqd_core::queue::{Item, QueueStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &[u8] = b"0123456789abcdef0123456789abcdef";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        5,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
        0.0,
    )
}

struct Harness {
    store: Arc<QueueStore>,
    downloader: Arc<Downloader>,
    observer: Observer,
    dir: TempDir,
}

fn harness(resolver: Arc<dyn LinkResolver>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(QueueStore::in_memory());
    let hub = NotificationHub::spawn(
        HubConfig {
            observer_buffer: 1024,
            ..HubConfig::default()
        },
        CancellationToken::new(),
    );
    let observer = hub.join();

    let mut config = DownloaderConfig::new(dir.path());
    config.retry_policy = fast_retry();
    let downloader = Arc::new(Downloader::new(
        Arc::clone(&store),
        hub,
        resolver,
        HttpClient::new().unwrap(),
        config,
    ));

    Harness {
        store,
        downloader,
        observer,
        dir,
    }
}

async fn mount_landing_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/video/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(support::landing_page("/free/abc")),
        )
        .mount(server)
        .await;
}

fn enqueue(store: &QueueStore, server: &MockServer) -> Item {
    let item = Item::new(format!("{}/video/1", server.uri()), "clip.mp4", 0);
    store.add_pending_item(item.clone()).unwrap();
    item
}

/// Drains every message already delivered to `observer`.
async fn drain(observer: &mut Observer) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(100), observer.next_message()).await
    {
        events.push(serde_json::from_str(&message).unwrap());
    }
    events
}

// ==================== Success Path Tests ====================

#[tokio::test]
async fn test_download_succeeds_after_transient_server_errors() {
    let server = MockServer::start().await;
    mount_landing_page(&server).await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(BODY.to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    let item = enqueue(&h.store, &server);

    assert!(h.downloader.process_next().await);

    let queue = h.store.get_queue();
    assert!(queue.pending.is_empty());
    assert!(queue.downloading.is_empty());
    assert_eq!(queue.completed.len(), 1);
    assert_eq!(queue.completed[0].id, item.id);
    assert_eq!(queue.completed[0].size, BODY.len() as u64);

    let written = std::fs::read(h.dir.path().join("clip.mp4")).unwrap();
    assert_eq!(written, BODY);

    assert_eq!(h.downloader.stats().retried(), 4);
    assert_eq!(h.downloader.stats().completed(), 1);
    assert!(!h.downloader.is_active(&item.id));

    let events = drain(&mut h.observer).await;
    assert!(events.iter().any(|event| matches!(
        event,
        HubEvent::Progress(update) if update.item_id == item.id && update.progress == 100
    )));
    assert!(events.iter().filter(|e| **e == HubEvent::Update).count() >= 2);
}

#[tokio::test]
async fn test_octet_stream_body_is_accepted() {
    let server = MockServer::start().await;
    mount_landing_page(&server).await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(BODY.to_vec()),
        )
        .mount(&server)
        .await;

    let h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    enqueue(&h.store, &server);

    assert!(h.downloader.process_next().await);
    assert_eq!(h.store.get_queue().completed.len(), 1);
}

// ==================== Failure Path Tests ====================

#[tokio::test]
async fn test_persistent_error_status_exhausts_retry_budget() {
    let server = MockServer::start().await;
    mount_landing_page(&server).await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(ResponseTemplate::new(403))
        .expect(5)
        .mount(&server)
        .await;

    let h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    let item = enqueue(&h.store, &server);

    assert!(h.downloader.process_next().await);

    let queue = h.store.get_queue();
    assert_eq!(queue.failed.len(), 1);
    assert_eq!(queue.failed[0].item.id, item.id);
    assert!(
        queue.failed[0]
            .error
            .starts_with("download failed after 5 attempts: HTTP 403"),
        "unexpected error: {}",
        queue.failed[0].error
    );
    assert_eq!(h.downloader.stats().retried(), 4);
    assert_eq!(h.downloader.stats().failed(), 1);
}

#[tokio::test]
async fn test_missing_form_fails_without_transfer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nothing here</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    enqueue(&h.store, &server);

    assert!(h.downloader.process_next().await);

    let queue = h.store.get_queue();
    assert_eq!(queue.failed.len(), 1);
    assert_eq!(queue.failed[0].error, "download form not found");
    assert_eq!(h.downloader.stats().retried(), 0);
}

#[tokio::test]
async fn test_disallowed_content_type_is_a_transfer_failure() {
    let server = MockServer::start().await;
    mount_landing_page(&server).await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html>captcha</html>"),
        )
        .expect(5)
        .mount(&server)
        .await;

    let h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    enqueue(&h.store, &server);

    assert!(h.downloader.process_next().await);

    let queue = h.store.get_queue();
    assert_eq!(queue.failed.len(), 1);
    assert!(queue.failed[0].error.contains("unexpected content type"));
    assert!(!h.dir.path().join("clip.mp4").exists());
}

// ==================== Cancellation Tests ====================

struct FixedResolver(String);

#[async_trait]
impl LinkResolver for FixedResolver {
    async fn resolve(&self, _page_url: &str) -> Result<String, DownloadError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_cancel_mid_transfer_fails_item_with_cancelled() {
    let addr = support::spawn_trickle_server(64 * 1024 * 1024, 16 * 1024, Duration::from_millis(20)).await;
    let mut h = harness(Arc::new(FixedResolver(format!("http://{addr}/free/x"))));
    let item = Item::new("https://example.com/video/9", "slow.mp4", 0);
    h.store.add_pending_item(item.clone()).unwrap();

    let worker = Arc::clone(&h.downloader);
    let task = tokio::spawn(async move { worker.process_next().await });

    let partial = h.dir.path().join("slow.mp4");
    let downloader = Arc::clone(&h.downloader);
    let item_id = item.id.clone();
    let started = support::wait_until(Duration::from_secs(5), || {
        let active = downloader.is_active(&item_id);
        let has_bytes = std::fs::metadata(&partial).is_ok_and(|m| m.len() > 0);
        async move { active && has_bytes }
    })
    .await;
    assert!(started, "transfer never started writing");

    assert!(h.downloader.cancel(&item.id));
    assert!(!h.downloader.cancel(&item.id), "cancel is single-use");

    assert!(tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap());

    let queue = h.store.get_queue();
    assert!(queue.downloading.is_empty());
    assert_eq!(queue.failed.len(), 1);
    assert_eq!(queue.failed[0].error, "cancelled");
    assert_eq!(h.downloader.stats().retried(), 0);

    let events = drain(&mut h.observer).await;
    assert!(events.iter().any(|event| matches!(
        event,
        HubEvent::Progress(update) if update.item_id == item.id && update.download_speed.is_empty()
    )));
}

#[tokio::test]
async fn test_cancel_unknown_item_reports_inactive() {
    let h = harness(Arc::new(FixedResolver("http://127.0.0.1:9/".to_string())));
    assert!(!h.downloader.cancel("does-not-exist"));
}

// ==================== Worker Loop Tests ====================

#[tokio::test]
async fn test_worker_loop_drains_pending_in_order() {
    let server = MockServer::start().await;
    mount_landing_page(&server).await;
    Mock::given(method("POST"))
        .and(path("/free/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .set_body_bytes(BODY.to_vec()),
        )
        .mount(&server)
        .await;

    let h = harness(Arc::new(FormLinkResolver::new().unwrap()));
    let first = enqueue(&h.store, &server);
    let second = Item::new(format!("{}/video/1", server.uri()), "second.mp4", 0);
    h.store.add_pending_item(second.clone()).unwrap();

    let shutdown = CancellationToken::new();
    let task = Arc::clone(&h.downloader).spawn(shutdown.clone());

    let store = Arc::clone(&h.store);
    let done = support::wait_until(Duration::from_secs(5), || {
        let completed = store.get_queue().completed.len();
        async move { completed == 2 }
    })
    .await;
    shutdown.cancel();
    task.await.unwrap();

    assert!(done);
    let completed: Vec<_> = h
        .store
        .get_queue()
        .completed
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(completed, vec![first.id, second.id]);
}
