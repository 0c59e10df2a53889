use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one node, readable from any thread.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    rows_rejected: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`NodeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Rows taken from input channels.
    pub rows_read: u64,
    /// Rows handed to the router.
    pub rows_written: u64,
    /// Rows sent to the error hop.
    pub rows_rejected: u64,
    /// Unrecoverable failures.
    pub errors: u64,
}

impl NodeMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_read(&self) -> u64 {
        self.rows_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_written(&self) -> u64 {
        self.rows_written.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_rejected(&self) -> u64 {
        self.rows_rejected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Rows read so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Rows rejected so far.
    #[must_use]
    pub fn rows_rejected(&self) -> u64 {
        self.rows_rejected.load(Ordering::Relaxed)
    }

    /// Errors so far.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_read: self.rows_read(),
            rows_written: self.rows_written(),
            rows_rejected: self.rows_rejected(),
            errors: self.errors(),
        }
    }
}

impl std::ops::AddAssign for MetricsSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.rows_read += other.rows_read;
        self.rows_written += other.rows_written;
        self.rows_rejected += other.rows_rejected;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = NodeMetrics::new();
        assert_eq!(metrics.add_read(), 1);
        assert_eq!(metrics.add_read(), 2);
        metrics.add_written();
        metrics.add_rejected();
        metrics.add_error();

        let snap = metrics.snapshot();
        assert_eq!(
            snap,
            MetricsSnapshot {
                rows_read: 2,
                rows_written: 1,
                rows_rejected: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn test_snapshot_sum() {
        let mut total = MetricsSnapshot::default();
        total += MetricsSnapshot {
            rows_read: 1,
            rows_written: 2,
            rows_rejected: 0,
            errors: 1,
        };
        total += MetricsSnapshot {
            rows_read: 3,
            ..MetricsSnapshot::default()
        };
        assert_eq!(total.rows_read, 4);
        assert_eq!(total.errors, 1);
    }
}
