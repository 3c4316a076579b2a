//! Storage metrics for observability.
//!
//! Tracks statistics about page traffic and commits for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Storage metrics container.
///
/// All counters are atomic for thread-safe access.
#[derive(Debug, Default)]
pub struct DbMetrics {
    /// Number of empty pages synthesized by write transactions.
    pub pages_allocated: AtomicU64,
    /// Number of copy-on-write page clones.
    pub cow_operations: AtomicU64,
    /// Number of page reads from the backend.
    pub page_reads: AtomicU64,
    /// Number of page writes to the backend.
    pub page_writes: AtomicU64,
    /// Number of transaction log entries spilled to overflow.
    pub log_spills: AtomicU64,
    /// Number of commits published.
    pub commits_completed: AtomicU64,
    /// Number of commits that failed.
    pub commits_failed: AtomicU64,
    /// Number of write transactions aborted.
    pub transactions_aborted: AtomicU64,
    /// Number of read transactions opened.
    pub read_transactions: AtomicU64,
    /// Total bytes written to the backend.
    pub bytes_written: AtomicU64,
    /// Total bytes read from the backend.
    pub bytes_read: AtomicU64,
}

impl DbMetrics {
    /// Creates a new metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages_allocated(&self) {
        self.pages_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cow_operations(&self) {
        self.cow_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one page read of `bytes` bytes.
    pub fn record_read(&self, bytes: usize) {
        self.page_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records one page write of `bytes` bytes.
    pub fn record_write(&self, bytes: usize) {
        self.page_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_log_spills(&self, count: u64) {
        self.log_spills.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_commits_completed(&self) {
        self.commits_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commits_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transactions_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_read_transactions(&self) {
        self.read_transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_allocated: self.pages_allocated.load(Ordering::Relaxed),
            cow_operations: self.cow_operations.load(Ordering::Relaxed),
            page_reads: self.page_reads.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
            log_spills: self.log_spills.load(Ordering::Relaxed),
            commits_completed: self.commits_completed.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            read_transactions: self.read_transactions.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.pages_allocated,
            &self.cow_operations,
            &self.page_reads,
            &self.page_writes,
            &self.log_spills,
            &self.commits_completed,
            &self.commits_failed,
            &self.transactions_aborted,
            &self.read_transactions,
            &self.bytes_written,
            &self.bytes_read,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pages_allocated: u64,
    pub cow_operations: u64,
    pub page_reads: u64,
    pub page_writes: u64,
    pub log_spills: u64,
    pub commits_completed: u64,
    pub commits_failed: u64,
    pub transactions_aborted: u64,
    pub read_transactions: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

impl MetricsSnapshot {
    /// Calculates the difference between two snapshots.
    pub fn diff(&self, other: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_allocated: self.pages_allocated.saturating_sub(other.pages_allocated),
            cow_operations: self.cow_operations.saturating_sub(other.cow_operations),
            page_reads: self.page_reads.saturating_sub(other.page_reads),
            page_writes: self.page_writes.saturating_sub(other.page_writes),
            log_spills: self.log_spills.saturating_sub(other.log_spills),
            commits_completed: self.commits_completed.saturating_sub(other.commits_completed),
            commits_failed: self.commits_failed.saturating_sub(other.commits_failed),
            transactions_aborted: self
                .transactions_aborted
                .saturating_sub(other.transactions_aborted),
            read_transactions: self.read_transactions.saturating_sub(other.read_transactions),
            bytes_written: self.bytes_written.saturating_sub(other.bytes_written),
            bytes_read: self.bytes_read.saturating_sub(other.bytes_read),
        }
    }

    /// Returns the average bytes per page write.
    pub fn avg_bytes_per_write(&self) -> f64 {
        if self.page_writes == 0 {
            0.0
        } else {
            self.bytes_written as f64 / self.page_writes as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Storage Metrics:")?;
        writeln!(f, "  Pages allocated:   {}", self.pages_allocated)?;
        writeln!(f, "  COW operations:    {}", self.cow_operations)?;
        writeln!(f, "  Page reads:        {}", self.page_reads)?;
        writeln!(f, "  Page writes:       {}", self.page_writes)?;
        writeln!(f, "  Log spills:        {}", self.log_spills)?;
        writeln!(f, "  Commits completed: {}", self.commits_completed)?;
        writeln!(f, "  Commits failed:    {}", self.commits_failed)?;
        writeln!(f, "  Aborted writes:    {}", self.transactions_aborted)?;
        writeln!(f, "  Read transactions: {}", self.read_transactions)?;
        writeln!(f, "  Bytes written:     {} ({:.2} KB)", self.bytes_written, self.bytes_written as f64 / 1024.0)?;
        writeln!(f, "  Bytes read:        {} ({:.2} KB)", self.bytes_read, self.bytes_read as f64 / 1024.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = DbMetrics::new();

        metrics.inc_pages_allocated();
        metrics.inc_pages_allocated();
        metrics.inc_cow_operations();
        metrics.record_write(100);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_allocated, 2);
        assert_eq!(snapshot.cow_operations, 1);
        assert_eq!(snapshot.page_writes, 1);
        assert_eq!(snapshot.bytes_written, 100);
    }

    #[test]
    fn test_metrics_snapshot_diff() {
        let metrics = DbMetrics::new();

        metrics.record_read(10);
        metrics.record_read(10);
        let snap1 = metrics.snapshot();

        metrics.record_read(10);
        metrics.record_read(10);
        metrics.record_read(10);
        let snap2 = metrics.snapshot();

        let diff = snap2.diff(&snap1);
        assert_eq!(diff.page_reads, 3);
        assert_eq!(diff.bytes_read, 30);
    }

    #[test]
    fn test_avg_bytes_per_write() {
        let snapshot = MetricsSnapshot {
            page_writes: 4,
            bytes_written: 400,
            ..MetricsSnapshot::default()
        };

        assert!((snapshot.avg_bytes_per_write() - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = DbMetrics::new();

        metrics.inc_pages_allocated();
        metrics.inc_commits_completed();

        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
