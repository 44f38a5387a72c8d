//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent
/// snapshot.
pub struct Metrics {
    /// Total frames ever processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of per-frame processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max per-frame latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Snapshots dropped on a congested sink (monotonic)
    snapshots_dropped: AtomicU64,
    /// Events dropped on a congested sink (monotonic)
    events_dropped: AtomicU64,
    /// Control commands applied (monotonic)
    commands_applied: AtomicU64,
    /// Control commands rejected (monotonic)
    commands_rejected: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: std::sync::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            snapshots_dropped: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            last_report_time: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Record a processed frame with its processing latency (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update max using compare-and-swap loop
        let mut current_max = self.latency_max_us.load(Ordering::Relaxed);
        while latency_us > current_max {
            match self.latency_max_us.compare_exchange_weak(
                current_max,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    #[inline]
    pub fn record_snapshot_dropped(&self) {
        self.snapshots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_applied(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn snapshots_dropped(&self) -> u64 {
        self.snapshots_dropped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self, active_tracks: usize, queue_length: usize) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);

        let frames_total = self.frames_total.load(Ordering::Relaxed);
        let snapshots_dropped = self.snapshots_dropped.load(Ordering::Relaxed);
        let events_dropped = self.events_dropped.load(Ordering::Relaxed);
        let commands_applied = self.commands_applied.load(Ordering::Relaxed);
        let commands_rejected = self.commands_rejected.load(Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock().unwrap();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total,
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            active_tracks,
            queue_length,
            snapshots_dropped,
            events_dropped,
            commands_applied,
            commands_rejected,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    pub active_tracks: usize,
    pub queue_length: usize,
    pub snapshots_dropped: u64,
    pub events_dropped: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_frame_latency_us = %self.avg_frame_latency_us,
            max_frame_latency_us = %self.max_frame_latency_us,
            active_tracks = %self.active_tracks,
            queue_length = %self.queue_length,
            snapshots_dropped = %self.snapshots_dropped,
            events_dropped = %self.events_dropped,
            commands_applied = %self.commands_applied,
            commands_rejected = %self.commands_rejected,
            "metrics"
        );
    }
}
