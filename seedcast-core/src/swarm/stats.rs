//! Byte counters for a transfer, readable without blocking the transfer path

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters updated by a download, read by progress reporting.
#[derive(Debug)]
pub struct TransferStats {
    total_length: u64,
    started: Instant,
    bytes_read: AtomicU64,
    bytes_read_useful: AtomicU64,
    pieces_rejected: AtomicU64,
}

/// Point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes received from seeds, including rejected pieces
    pub bytes_read: u64,
    /// Bytes that verified and were written
    pub bytes_read_useful: u64,
    pub pieces_rejected: u64,
    pub total_length: u64,
}

impl TransferStats {
    pub fn new(total_length: u64) -> Self {
        Self {
            total_length,
            started: Instant::now(),
            bytes_read: AtomicU64::new(0),
            bytes_read_useful: AtomicU64::new(0),
            pieces_rejected: AtomicU64::new(0),
        }
    }

    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_useful(&self, bytes: u64) {
        self.bytes_read_useful.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.pieces_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_read_useful: self.bytes_read_useful.load(Ordering::Relaxed),
            pieces_rejected: self.pieces_rejected.load(Ordering::Relaxed),
            total_length: self.total_length,
        }
    }
}

impl StatsSnapshot {
    /// Useful bytes per second over `elapsed`.
    pub fn average_rate(&self, elapsed: Duration) -> u64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes_read_useful as f64 / secs) as u64
    }

    /// Percentage of read bytes that were useful, 100 when nothing was read.
    pub fn useful_ratio(&self) -> f64 {
        if self.bytes_read == 0 {
            return 100.0;
        }
        self.bytes_read_useful as f64 * 100.0 / self.bytes_read as f64
    }
}

/// Formats a byte count into a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if value >= 10.0 {
        format!("{:.0} {}", value, UNITS[unit_index])
    } else {
        format!("{:.1} {}", value, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_ratio() {
        let stats = TransferStats::new(100);
        stats.record_read(40);
        stats.record_read(40);
        stats.record_useful(40);
        stats.record_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_read, 80);
        assert_eq!(snapshot.pieces_rejected, 1);
        assert!((snapshot.useful_ratio() - 50.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.average_rate(Duration::from_secs(2)), 20);
        assert_eq!(snapshot.average_rate(Duration::ZERO), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(300 * 1024 * 1024), "300 MiB");
    }
}
