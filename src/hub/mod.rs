//! Notification hub: best-effort fan-out of queue events to live observers.
//!
//! Producers (route handlers and the download worker) push [`HubEvent`]s
//! into a single unbounded stream, so publishing never waits on a
//! subscriber. One dispatcher task serializes each event once and offers the
//! text to every observer's bounded mailbox with `try_send`. An observer
//! whose mailbox is full or closed is dropped from the registry; the others
//! are unaffected.
//!
//! A heartbeat task publishes an `update` every [`HubConfig::heartbeat_interval`]
//! so idle observers can detect liveness and resynchronize.
//!
//! # Example
//!
//! ```no_run
//! use fsqd_core::hub::{HubConfig, NotificationHub};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let hub = NotificationHub::spawn(HubConfig::default(), CancellationToken::new());
//! let mut observer = hub.join();
//! hub.broadcast_update();
//! assert_eq!(observer.next_message().await.as_deref(), Some(r#"{"type":"update"}"#));
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of undelivered messages an observer may lag behind.
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

/// Per-item transfer progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub item_id: String,
    /// Percent complete, 0 to 100.
    pub progress: u8,
    /// Human-readable throughput; empty after a cancel.
    pub download_speed: String,
}

/// Message kinds delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubEvent {
    /// Queue state changed; observers should re-fetch it.
    Update,
    /// Progress of the in-flight item.
    Progress(ProgressUpdate),
}

/// Hub tunables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub observer_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            observer_buffer: DEFAULT_OBSERVER_BUFFER,
        }
    }
}

type Registry = DashMap<u64, mpsc::Sender<Arc<str>>>;

/// Handle for publishing events and registering observers.
///
/// Cheap to clone; all clones share the same dispatcher.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    events: mpsc::UnboundedSender<HubEvent>,
    observers: Arc<Registry>,
    next_observer_id: Arc<AtomicU64>,
    observer_buffer: usize,
}

impl NotificationHub {
    /// Starts the dispatcher and heartbeat tasks. Both stop when `shutdown`
    /// is cancelled, which also disconnects every observer.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(config: HubConfig, shutdown: CancellationToken) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let observers = Arc::new(Registry::new());

        tokio::spawn(dispatch(receiver, Arc::clone(&observers), shutdown.clone()));
        tokio::spawn(heartbeat(
            events.clone(),
            config.heartbeat_interval,
            shutdown,
        ));

        Self {
            events,
            observers,
            next_observer_id: Arc::new(AtomicU64::new(1)),
            observer_buffer: config.observer_buffer.max(1),
        }
    }

    /// Registers a new observer. It is deregistered when dropped.
    #[must_use]
    pub fn join(&self) -> Observer {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let (sender, messages) = mpsc::channel(self.observer_buffer);
        self.observers.insert(id, sender);
        debug!(observer_id = id, observers = self.observers.len(), "observer joined");
        Observer {
            id,
            messages,
            observers: Arc::clone(&self.observers),
        }
    }

    /// Announces that queue state changed.
    pub fn broadcast_update(&self) {
        self.publish(HubEvent::Update);
    }

    /// Announces progress of an in-flight item.
    pub fn broadcast_progress(&self, update: ProgressUpdate) {
        self.publish(HubEvent::Progress(update));
    }

    /// Number of currently registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn publish(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("hub dispatcher stopped, event dropped");
        }
    }
}

/// A registered observer's receiving end.
#[derive(Debug)]
pub struct Observer {
    id: u64,
    messages: mpsc::Receiver<Arc<str>>,
    observers: Arc<Registry>,
}

impl Observer {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next serialized event. `None` once the hub has dropped
    /// this observer (too slow) or shut down.
    pub async fn next_message(&mut self) -> Option<Arc<str>> {
        self.messages.recv().await
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if self.observers.remove(&self.id).is_some() {
            debug!(observer_id = self.id, "observer left");
        }
    }
}

async fn dispatch(
    mut events: mpsc::UnboundedReceiver<HubEvent>,
    observers: Arc<Registry>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let message: Arc<str> = match serde_json::to_string(&event) {
            Ok(json) => json.into(),
            Err(error) => {
                warn!(error = %error, "failed to serialize hub event");
                continue;
            }
        };

        observers.retain(|id, sink| match sink.try_send(Arc::clone(&message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(observer_id = id, "observer fell behind, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer_id = id, "observer closed, removing");
                false
            }
        });
    }

    observers.clear();
    info!("notification hub stopped");
}

async fn heartbeat(
    events: mpsc::UnboundedSender<HubEvent>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if events.send(HubEvent::Update).is_err() {
                    break;
                }
            }
        }
    }
}
