//! Per-transfer progress accounting.
//!
//! [`ProgressTracker`] turns a stream of chunk sizes into throttled
//! [`ProgressUpdate`] events: at most one per reporting interval, plus a
//! forced final event at end of stream or on cancellation.

use std::time::{Duration, Instant};

use crate::hub::ProgressUpdate;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Tracks bytes transferred for one item and decides when to report.
#[derive(Debug)]
pub struct ProgressTracker {
    item_id: String,
    total_size: u64,
    transferred: u64,
    window_bytes: u64,
    window_start: Instant,
    interval: Duration,
    last_speed: String,
}

impl ProgressTracker {
    /// Starts tracking. `total_size == 0` means the size is unknown and the
    /// percentage stays at 0 until the final event.
    #[must_use]
    pub fn new(item_id: impl Into<String>, total_size: u64, interval: Duration) -> Self {
        Self {
            item_id: item_id.into(),
            total_size,
            transferred: 0,
            window_bytes: 0,
            window_start: Instant::now(),
            interval,
            last_speed: String::new(),
        }
    }

    /// Records `bytes` more transferred. Returns an event once the reporting
    /// interval has elapsed since the previous one.
    pub fn record(&mut self, bytes: usize) -> Option<ProgressUpdate> {
        self.record_at(bytes, Instant::now())
    }

    fn record_at(&mut self, bytes: usize, now: Instant) -> Option<ProgressUpdate> {
        let bytes = bytes as u64;
        self.transferred += bytes;
        self.window_bytes += bytes;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let speed = self.window_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        self.last_speed = format_speed(speed);
        self.window_bytes = 0;
        self.window_start = now;
        Some(self.update(self.percent(), self.last_speed.clone()))
    }

    /// Bytes recorded so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// `floor(100 * transferred / total)`, capped at 100; 0 when the size is unknown.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 0;
        }
        let percent = (u128::from(self.transferred) * 100 / u128::from(self.total_size)).min(100);
        u8::try_from(percent).unwrap_or(100)
    }

    /// Final event at end of stream: 100% with the last measured speed.
    #[must_use]
    pub fn finished(&self) -> ProgressUpdate {
        self.update(100, self.last_speed.clone())
    }

    /// Final event after a cancel: current percentage with an empty speed.
    #[must_use]
    pub fn cancelled(&self) -> ProgressUpdate {
        self.update(self.percent(), String::new())
    }

    fn update(&self, progress: u8, download_speed: String) -> ProgressUpdate {
        ProgressUpdate {
            item_id: self.item_id.clone(),
            progress,
            download_speed,
        }
    }
}

/// Formats a throughput in bytes per second as `B/s`, `KB/s` or `MB/s` with
/// one decimal place, switching units at 1024.
#[must_use]
pub fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second >= MIB {
        format!("{:.1} MB/s", bytes_per_second / MIB)
    } else if bytes_per_second >= KIB {
        format!("{:.1} KB/s", bytes_per_second / KIB)
    } else {
        format!("{bytes_per_second:.1} B/s")
    }
}
