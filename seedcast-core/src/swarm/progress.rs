//! Periodic download progress lines
//!
//! The reporter only reads piece counts and byte counters; it never touches
//! the transfer path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::stats::format_bytes;
use super::{PieceStateFeed, PieceStateTable, PieceStatus, StatsSnapshot, TransferStats};

/// Logs download progress on a fixed interval.
pub struct ProgressReporter {
    name: String,
    feed: Arc<PieceStateTable>,
    stats: Arc<TransferStats>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(
        name: impl Into<String>,
        feed: Arc<PieceStateTable>,
        stats: Arc<TransferStats>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            feed,
            stats,
            interval,
        }
    }

    /// Runs until `cancel` fires, logging only when the line changes.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.interval.max(Duration::from_millis(10));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            let mut last_useful = self.stats.snapshot().bytes_read_useful;
            let mut last_line = String::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = self.stats.snapshot();
                let rate = rate_between(last_useful, snapshot.bytes_read_useful, period);
                last_useful = snapshot.bytes_read_useful;

                let line = self.line(&snapshot, rate);
                if line != last_line {
                    tracing::info!("{line}");
                    last_line = line;
                }
            }
        })
    }

    fn line(&self, snapshot: &StatsSnapshot, rate: u64) -> String {
        progress_line(
            &self.name,
            self.stats.elapsed(),
            snapshot,
            self.feed.count(PieceStatus::Complete),
            self.feed.count(PieceStatus::Partial),
            self.feed.piece_count(),
            rate,
        )
    }
}

fn rate_between(previous: u64, current: u64, period: Duration) -> u64 {
    let secs = period.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (current.saturating_sub(previous) as f64 / secs) as u64
}

/// One progress line.
pub fn progress_line(
    name: &str,
    elapsed: Duration,
    snapshot: &StatsSnapshot,
    completed: u32,
    partial: u32,
    piece_count: u32,
    rate: u64,
) -> String {
    format!(
        "{:.1?}: downloading {name:?}: {}/{}, {completed}/{piece_count} pieces completed ({partial} partial): {}/s",
        elapsed,
        format_bytes(snapshot.bytes_read_useful),
        format_bytes(snapshot.total_length),
        format_bytes(rate),
    )
}

/// Closing line with the average rate and the useful share of read bytes.
pub fn summary_line(snapshot: &StatsSnapshot, elapsed: Duration) -> String {
    format!(
        "Downloaded {} in {:.2?}: average {}/s, {:.2}% of read bytes useful",
        format_bytes(snapshot.bytes_read_useful),
        elapsed,
        format_bytes(snapshot.average_rate(elapsed)),
        snapshot.useful_ratio(),
    )
}
