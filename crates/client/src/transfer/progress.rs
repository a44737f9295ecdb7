//! Transfer progress accounting.
//!
//! Bytes are counted cumulatively. The transfer rate is the cumulative
//! average since the session started and is recomputed no more often than
//! the configured sampling interval.

use std::time::Duration;

use tokio::time::Instant;

/// Highest percentage reported before a session completes.
pub const IN_FLIGHT_PERCENT_CAP: f64 = 99.9;

/// A point-in-time view of a session's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes moved so far.
    pub transferred: u64,
    /// Declared file size.
    pub total: u64,
    /// Completion percentage in `[0, 100]`.
    pub percent: f64,
    /// Average rate in bytes per second.
    pub bytes_per_sec: f64,
    /// Time since the session started.
    pub elapsed: Duration,
}

/// Progress tracker for one transfer session.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    transferred: u64,
    started_at: Instant,
    last_sample_at: Instant,
    sample_interval: Duration,
    bytes_per_sec: f64,
    complete: bool,
}

impl ProgressTracker {
    /// Starts tracking a session of `total` bytes.
    pub fn new(total: u64, sample_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            transferred: 0,
            started_at: now,
            last_sample_at: now,
            sample_interval,
            bytes_per_sec: 0.0,
            complete: false,
        }
    }

    /// Adds `bytes` to the counter.
    ///
    /// Returns a snapshot when the sampling interval has elapsed and the rate
    /// was recomputed, `None` otherwise.
    pub fn record(&mut self, bytes: u64) -> Option<ProgressSnapshot> {
        self.transferred = self.transferred.saturating_add(bytes);

        let now = Instant::now();
        if now.duration_since(self.last_sample_at) < self.sample_interval {
            return None;
        }
        self.sample(now);
        Some(self.snapshot())
    }

    /// Marks the session complete and takes a final sample.
    pub fn finish(&mut self) -> ProgressSnapshot {
        self.complete = true;
        self.sample(Instant::now());
        self.snapshot()
    }

    /// Bytes moved so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Completion percentage. Exactly 100 only once finished.
    pub fn percent(&self) -> f64 {
        if self.complete {
            return 100.0;
        }
        if self.total == 0 {
            return 0.0;
        }
        let raw = self.transferred as f64 / self.total as f64 * 100.0;
        raw.clamp(0.0, IN_FLIGHT_PERCENT_CAP)
    }

    /// Current progress without resampling the rate.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            transferred: self.transferred,
            total: self.total,
            percent: self.percent(),
            bytes_per_sec: self.bytes_per_sec,
            elapsed: self.started_at.elapsed(),
        }
    }

    fn sample(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.started_at).as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_per_sec = self.transferred as f64 / elapsed;
        }
        self.last_sample_at = now;
    }
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{size:.2} {}", UNITS[unit_idx])
    }
}

/// Format a transfer rate as human-readable speed.
pub fn format_rate(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_recomputed_at_most_every_interval() {
        let mut tracker = ProgressTracker::new(10_000, Duration::from_millis(500));

        assert!(tracker.record(1000).is_none());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(tracker.record(1000).is_none());

        tokio::time::advance(Duration::from_millis(300)).await;
        let snapshot = tracker.record(1000).unwrap();
        assert_eq!(snapshot.transferred, 3000);
        assert!((snapshot.bytes_per_sec - 6000.0).abs() < 1.0);

        // Next sample not due yet.
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(tracker.record(1000).is_none());
        assert!((tracker.snapshot().bytes_per_sec - 6000.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_cumulative_average() {
        let mut tracker = ProgressTracker::new(100_000, Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.record(10_000).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let snapshot = tracker.record(30_000).unwrap();

        // 40 000 bytes over 2 seconds.
        assert!((snapshot.bytes_per_sec - 20_000.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_percent_is_monotonic_and_capped_until_finish() {
        let mut tracker = ProgressTracker::new(1000, Duration::from_millis(500));
        let mut last = tracker.percent();

        for _ in 0..10 {
            tracker.record(100);
            let current = tracker.percent();
            assert!(current >= last);
            assert!(current < 100.0);
            last = current;
        }

        assert_eq!(tracker.transferred(), 1000);
        assert_eq!(tracker.finish().percent, 100.0);
    }

    #[test]
    fn test_percent_clamped_on_overflow() {
        let mut tracker = ProgressTracker::new(10, Duration::from_millis(500));
        tracker.record(50);
        assert_eq!(tracker.percent(), IN_FLIGHT_PERCENT_CAP);
    }

    #[test]
    fn test_zero_size_percent() {
        let mut tracker = ProgressTracker::new(0, Duration::from_millis(500));
        assert_eq!(tracker.percent(), 0.0);
        assert_eq!(tracker.finish().percent, 100.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.50 GB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0 B/s");
        assert_eq!(format_rate(f64::NAN), "0 B/s");
        assert_eq!(format_rate(2048.0), "2.00 KB/s");
    }
}
