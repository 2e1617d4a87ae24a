//! Sliding-window throughput tracking, cumulative totals, and ETA.

use crate::events::PerformanceSnapshot;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 5-second window of `(t, cumulative_value)` samples used to derive an
/// instantaneous rate from the oldest-vs-newest delta.
struct RateWindow {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl RateWindow {
    fn new(window: Duration) -> Self {
        Self { samples: VecDeque::new(), window }
    }

    fn push(&mut self, now: Instant, cumulative: u64) {
        self.samples.push_back((now, cumulative));
        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        while let Some(&(t, _)) = self.samples.front() {
            if t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn instant_rate(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let (oldest_t, oldest_v) = *self.samples.front().unwrap();
        let (latest_t, latest_v) = *self.samples.back().unwrap();
        let dt = latest_t.duration_since(oldest_t).as_secs_f64();
        if dt > 0.0 {
            (latest_v - oldest_v) as f64 / dt
        } else {
            0.0
        }
    }
}

/// Tracks cumulative and instantaneous throughput for one migration job.
pub struct PerformanceMetrics {
    start_time: Instant,
    total_rows: u64,
    total_bytes: u64,
    total_partitions: u32,
    completed_partitions: u32,
    current_partition: Option<String>,
    current_partition_rows: u64,
    current_partition_total_rows: u64,
    row_window: RateWindow,
    byte_window: RateWindow,
}

impl PerformanceMetrics {
    pub fn new(total_partitions: u32) -> Self {
        Self {
            start_time: Instant::now(),
            total_rows: 0,
            total_bytes: 0,
            total_partitions,
            completed_partitions: 0,
            current_partition: None,
            current_partition_rows: 0,
            current_partition_total_rows: 0,
            row_window: RateWindow::new(Duration::from_secs(5)),
            byte_window: RateWindow::new(Duration::from_secs(5)),
        }
    }

    pub fn start_partition(&mut self, partition_name: impl Into<String>, total_rows: u64) {
        self.current_partition = Some(partition_name.into());
        self.current_partition_rows = 0;
        self.current_partition_total_rows = total_rows;
    }

    /// Record a completed chunk: `rows` and `bytes_transferred` are deltas,
    /// not running totals.
    pub fn update(&mut self, rows: u64, bytes_transferred: u64) {
        let now = Instant::now();
        self.total_rows += rows;
        self.total_bytes += bytes_transferred;
        self.current_partition_rows += rows;
        self.row_window.push(now, self.total_rows);
        self.byte_window.push(now, self.total_bytes);
    }

    pub fn complete_partition(&mut self) {
        self.completed_partitions += 1;
        self.current_partition = None;
        self.current_partition_rows = 0;
        self.current_partition_total_rows = 0;
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn current_partition(&self) -> Option<&str> {
        self.current_partition.as_deref()
    }

    pub fn current_partition_rows(&self) -> u64 {
        self.current_partition_rows
    }

    /// ETA for the whole job: remaining rows in the current partition plus
    /// the remaining partitions (assumed same size as the current one),
    /// divided by the instantaneous row rate. Zero when the rate is
    /// non-positive or there's no current partition to size the estimate by.
    fn eta_seconds(&self, instant_rows_per_sec: f64) -> f64 {
        if instant_rows_per_sec <= 0.0 || self.current_partition_total_rows == 0 {
            return 0.0;
        }
        let remaining_in_current = self.current_partition_total_rows.saturating_sub(self.current_partition_rows);
        let remaining_partitions = self
            .total_partitions
            .saturating_sub(self.completed_partitions)
            .saturating_sub(1) as u64;
        let estimated_remaining = remaining_in_current + remaining_partitions * self.current_partition_total_rows;
        estimated_remaining as f64 / instant_rows_per_sec
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let avg_rows_per_sec = if elapsed > 0.0 { self.total_rows as f64 / elapsed } else { 0.0 };
        let avg_mb_per_sec = if elapsed > 0.0 {
            (self.total_bytes as f64 / (1024.0 * 1024.0)) / elapsed
        } else {
            0.0
        };

        let instant_rows_per_sec = self.row_window.instant_rate();
        let instant_mb_per_sec = self.byte_window.instant_rate() / (1024.0 * 1024.0);

        PerformanceSnapshot {
            instant_rows_per_sec,
            instant_mb_per_sec,
            eta_seconds: self.eta_seconds(instant_rows_per_sec),
            elapsed_seconds: elapsed,
            total_rows: self.total_rows,
            total_mb: self.total_bytes as f64 / (1024.0 * 1024.0),
            avg_rows_per_sec,
            avg_mb_per_sec,
        }
    }

    pub fn progress(&self) -> crate::events::Progress {
        let partition_progress = if self.current_partition_total_rows > 0 {
            self.current_partition_rows as f64 / self.current_partition_total_rows as f64
        } else {
            0.0
        };
        let total_progress = if self.total_partitions > 0 {
            self.completed_partitions as f64 / self.total_partitions as f64
        } else {
            0.0
        };

        crate::events::Progress {
            total_progress,
            partition_progress,
            completed_partitions: self.completed_partitions,
            total_partitions: self.total_partitions,
            current_partition: self.current_partition.clone(),
            current_rows: self.current_partition_rows,
            speed: self.row_window.instant_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_zero_before_any_update() {
        let metrics = PerformanceMetrics::new(4);
        let progress = metrics.progress();
        assert_eq!(progress.total_progress, 0.0);
        assert_eq!(progress.completed_partitions, 0);
    }

    #[test]
    fn completing_partitions_advances_total_progress() {
        let mut metrics = PerformanceMetrics::new(4);
        metrics.start_partition("p1", 100);
        metrics.update(100, 1000);
        metrics.complete_partition();
        let progress = metrics.progress();
        assert_eq!(progress.completed_partitions, 1);
        assert_eq!(progress.total_progress, 0.25);
    }

    #[test]
    fn eta_is_zero_without_a_positive_rate() {
        let metrics = PerformanceMetrics::new(1);
        assert_eq!(metrics.eta_seconds(0.0), 0.0);
        assert_eq!(metrics.eta_seconds(-1.0), 0.0);
    }

    #[test]
    fn eta_accounts_for_remaining_partitions_sized_like_current() {
        let mut metrics = PerformanceMetrics::new(3);
        metrics.start_partition("p1", 1000);
        metrics.current_partition_rows = 400;
        metrics.completed_partitions = 0;
        // remaining_in_current = 600, remaining_partitions = 3 - 0 - 1 = 2
        // estimated_remaining = 600 + 2*1000 = 2600; rate = 100 -> eta = 26
        assert_eq!(metrics.eta_seconds(100.0), 26.0);
    }
}
