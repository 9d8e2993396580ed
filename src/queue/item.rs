//! Queue item types and identifier generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A single download job.
///
/// Everything except `size` is fixed at creation time; `size` may be refined
/// once the transfer endpoint reports a content length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Opaque, time-derived identifier.
    pub id: String,
    /// Landing-page link the file is scraped from.
    pub link: String,
    /// Display name, also used to derive the on-disk filename.
    pub name: String,
    /// Expected size in bytes (0 = unknown).
    pub size: u64,
    /// When the item was enqueued. The offset it was written with is kept.
    pub added_at: DateTime<FixedOffset>,
}

impl Item {
    /// Creates a new item with a freshly generated id and the current time.
    #[must_use]
    pub fn new(link: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: next_item_id(),
            link: link.into(),
            name: name.into(),
            size,
            added_at: Utc::now().fixed_offset(),
        }
    }
}

/// An item that left Downloading or Pending because of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    #[serde(flatten)]
    pub item: Item,
    /// Human-readable failure message.
    pub error: String,
}

/// Full live view of the queue, including in-flight items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub downloading: Vec<Item>,
    #[serde(default)]
    pub pending: Vec<Item>,
    #[serde(default)]
    pub completed: Vec<Item>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

impl Queue {
    /// Returns the snapshot shape written to disk (no `downloading`).
    #[must_use]
    pub fn to_persisted(&self) -> PersistedQueue {
        PersistedQueue {
            pending: self.pending.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        }
    }

    /// Number of items across all four sequences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.downloading.len() + self.pending.len() + self.completed.len() + self.failed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<PersistedQueue> for Queue {
    fn from(persisted: PersistedQueue) -> Self {
        Self {
            downloading: Vec::new(),
            pending: persisted.pending,
            completed: persisted.completed,
            failed: persisted.failed,
        }
    }
}

/// On-disk snapshot of the queue. In-flight state is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQueue {
    #[serde(default)]
    pub pending: Vec<Item>,
    #[serde(default)]
    pub completed: Vec<Item>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

/// Direction for reordering a pending item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards the head of Pending (downloaded sooner).
    Up,
    /// Towards the tail of Pending.
    Down,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

static LAST_ISSUED_ID: AtomicU64 = AtomicU64::new(0);

/// Generates the next item id: epoch milliseconds, bumped past the last issued
/// value when the clock has not advanced.
#[must_use]
pub fn next_item_id() -> String {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let mut last = LAST_ISSUED_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ISSUED_ID.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate.to_string(),
            Err(observed) => last = observed,
        }
    }
}
