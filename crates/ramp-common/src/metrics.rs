//! Update metrics for the ramp loop.
//!
//! Tracks how many writes went out, how long the service took to
//! acknowledge them, and how many ticks were lost to overruns.

use std::time::Duration;

/// Counters and write-latency statistics for one ramp run.
#[derive(Debug)]
pub struct UpdateMetrics {
    /// Ring buffer of write latencies in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Updates acknowledged by the service.
    updates_sent: u64,
    /// Updates the service rejected and the policy skipped.
    updates_failed: u64,
    /// Tick periods lost to overruns.
    missed_ticks: u64,
    /// Last value acknowledged by the service.
    last_value: Option<f64>,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
}

impl Default for UpdateMetrics {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl UpdateMetrics {
    /// Create a collector retaining the last `histogram_size` latencies.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            updates_sent: 0,
            updates_failed: 0,
            missed_ticks: 0,
            last_value: None,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
        }
    }

    /// Record an acknowledged write of `value` that took `latency`.
    pub fn record_update(&mut self, value: f64, latency: Duration) {
        let ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.updates_sent += 1;
        self.last_value = Some(value);
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.saturating_add(ns);
    }

    /// Record a write the service rejected.
    pub fn record_failure(&mut self) {
        self.updates_failed += 1;
    }

    /// Record ticks skipped because an iteration overran.
    pub fn record_missed_ticks(&mut self, missed: u64) {
        self.missed_ticks += missed;
    }

    /// Acknowledged updates.
    #[must_use]
    pub fn updates_sent(&self) -> u64 {
        self.updates_sent
    }

    /// Rejected updates.
    #[must_use]
    pub fn updates_failed(&self) -> u64 {
        self.updates_failed
    }

    /// Ticks lost to overruns.
    #[must_use]
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks
    }

    /// Last value acknowledged by the service.
    #[must_use]
    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// Fastest write.
    #[must_use]
    pub fn min_latency(&self) -> Option<Duration> {
        (self.updates_sent > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Slowest write.
    #[must_use]
    pub fn max_latency(&self) -> Option<Duration> {
        (self.updates_sent > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean write latency over the whole run.
    #[must_use]
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.updates_sent > 0).then(|| Duration::from_nanos(self.sum_ns / self.updates_sent))
    }

    /// Latency percentile over the retained window.
    ///
    /// Returns `None` if no samples exist or `percentile` is outside 0..=100.
    #[must_use]
    pub fn latency_percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let metrics = UpdateMetrics::default();
        assert_eq!(metrics.updates_sent(), 0);
        assert!(metrics.last_value().is_none());
        assert!(metrics.mean_latency().is_none());
        assert!(metrics.latency_percentile(50.0).is_none());
    }

    #[test]
    fn test_record_updates() {
        let mut metrics = UpdateMetrics::new(16);
        metrics.record_update(0.0, Duration::from_micros(100));
        metrics.record_update(0.1, Duration::from_micros(300));
        metrics.record_update(0.2, Duration::from_micros(200));

        assert_eq!(metrics.updates_sent(), 3);
        assert_eq!(metrics.last_value(), Some(0.2));
        assert_eq!(metrics.min_latency(), Some(Duration::from_micros(100)));
        assert_eq!(metrics.max_latency(), Some(Duration::from_micros(300)));
        assert_eq!(metrics.mean_latency(), Some(Duration::from_micros(200)));
        assert_eq!(metrics.latency_percentile(50.0), Some(Duration::from_micros(200)));
    }

    #[test]
    fn test_failures_and_missed_ticks() {
        let mut metrics = UpdateMetrics::default();
        metrics.record_failure();
        metrics.record_missed_ticks(3);
        metrics.record_missed_ticks(0);

        assert_eq!(metrics.updates_failed(), 1);
        assert_eq!(metrics.missed_ticks(), 3);
        assert_eq!(metrics.updates_sent(), 0);
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut metrics = UpdateMetrics::new(2);
        metrics.record_update(1.0, Duration::from_millis(50));
        metrics.record_update(2.0, Duration::from_millis(1));
        metrics.record_update(3.0, Duration::from_millis(2));

        // Window holds only the last two samples, totals cover all three
        assert_eq!(metrics.latency_percentile(100.0), Some(Duration::from_millis(2)));
        assert_eq!(metrics.max_latency(), Some(Duration::from_millis(50)));
        assert_eq!(metrics.updates_sent(), 3);
    }

    #[test]
    fn test_percentile_out_of_range() {
        let mut metrics = UpdateMetrics::new(4);
        metrics.record_update(0.0, Duration::from_micros(10));
        assert!(metrics.latency_percentile(101.0).is_none());
        assert!(metrics.latency_percentile(-1.0).is_none());
    }
}
