//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use replaycam_ipc::PipelineMetrics;

/// Collects pipeline counters.
///
/// Counters are written by the dispatch thread and the camera listener and
/// read from any thread.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    frames_available: AtomicU64,
    frames_coalesced: AtomicU64,
    frames_rendered: AtomicU64,
    frames_submitted: AtomicU64,
    frames_paused: AtomicU64,
    draw_failures: AtomicU64,
    swap_failures: AtomicU64,
    saves_completed: AtomicU64,
    saves_failed: AtomicU64,
    buffered_usec: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_rendered: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            frames_available: AtomicU64::new(0),
            frames_coalesced: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            frames_submitted: AtomicU64::new(0),
            frames_paused: AtomicU64::new(0),
            draw_failures: AtomicU64::new(0),
            swap_failures: AtomicU64::new(0),
            saves_completed: AtomicU64::new(0),
            saves_failed: AtomicU64::new(0),
            buffered_usec: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_rendered: AtomicU64::new(0),
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn record_frame_available(&self) {
        self.frames_available.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.frames_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_paused(&self) {
        self.frames_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_draw_failure(&self) {
        self.draw_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swap_failure(&self) {
        self.swap_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a save.
    pub fn record_save(&self, status: i32) {
        if status == 0 {
            self.saves_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.saves_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Update the last reported buffered duration.
    pub fn set_buffered(&self, duration_usec: u64) {
        self.buffered_usec.store(duration_usec, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> PipelineMetrics {
        let now = Instant::now();

        let elapsed = now.duration_since(*self.last_report_time.read());
        let rendered = self.frames_rendered.load(Ordering::Relaxed);
        let last_rendered = self.last_rendered.load(Ordering::Relaxed);
        let render_fps = if elapsed.as_secs_f32() > 0.0 {
            rendered.saturating_sub(last_rendered) as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        PipelineMetrics {
            render_fps,
            frames_available: self.frames_available.load(Ordering::Relaxed),
            frames_coalesced: self.frames_coalesced.load(Ordering::Relaxed),
            frames_rendered: rendered,
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_paused: self.frames_paused.load(Ordering::Relaxed),
            draw_failures: self.draw_failures.load(Ordering::Relaxed),
            swap_failures: self.swap_failures.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
            buffered_usec: self.buffered_usec.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }

    /// Update last report time for FPS calculation.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_rendered.store(
            self.frames_rendered.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_in_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.start();
        metrics.record_frame_available();
        metrics.record_frame_available();
        metrics.record_coalesced();
        metrics.record_rendered();
        metrics.record_submitted();
        metrics.record_paused();
        metrics.record_swap_failure();
        metrics.record_save(0);
        metrics.record_save(2);
        metrics.set_buffered(1_500_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_available, 2);
        assert_eq!(snapshot.frames_coalesced, 1);
        assert_eq!(snapshot.frames_rendered, 1);
        assert_eq!(snapshot.frames_submitted, 1);
        assert_eq!(snapshot.frames_paused, 1);
        assert_eq!(snapshot.swap_failures, 1);
        assert_eq!(snapshot.draw_failures, 0);
        assert_eq!(snapshot.saves_completed, 1);
        assert_eq!(snapshot.saves_failed, 1);
        assert_eq!(snapshot.buffered_usec, 1_500_000);
    }

    #[test]
    fn test_render_fps_resets_after_report() {
        let metrics = MetricsCollector::new();
        metrics.start();
        for _ in 0..10 {
            metrics.record_rendered();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(metrics.snapshot().render_fps > 0.0);

        metrics.mark_reported();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(metrics.snapshot().render_fps, 0.0);
    }
}
