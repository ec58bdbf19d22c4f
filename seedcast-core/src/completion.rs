//! Peer completion bookkeeping for a distribution session
//!
//! Send acknowledgements, receipt reports, the session start time and the
//! "all peers received" flag share one lock, so the check that fires the
//! completion event is atomic with the increment that reaches the threshold.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Result of recording one peer receipt report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Report counted, more peers outstanding
    Counted { received: u64, expected: u64 },
    /// This report completed the distribution
    Completed {
        received: u64,
        /// Time since the session started, if it was started
        elapsed: Option<Duration>,
    },
    /// Report arrived after completion already fired
    Duplicate { received: u64 },
}

impl ReceiveOutcome {
    /// True only for the single report that completed the distribution.
    pub fn just_completed(&self) -> bool {
        matches!(self, ReceiveOutcome::Completed { .. })
    }

    pub fn received(&self) -> u64 {
        match *self {
            ReceiveOutcome::Counted { received, .. }
            | ReceiveOutcome::Completed { received, .. }
            | ReceiveOutcome::Duplicate { received } => received,
        }
    }
}

#[derive(Debug, Default)]
struct CompletionCounters {
    send_times: u64,
    recv_times: u64,
    started_at: Option<Instant>,
    completed: bool,
}

/// Thread-safe counters deciding when every expected peer has reported.
#[derive(Debug, Default)]
pub struct PeerCompletionTracker {
    counters: Mutex<CompletionCounters>,
}

impl PeerCompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the session start time if it is not set yet.
    ///
    /// Returns true for the call that set it.
    pub fn mark_started(&self) -> bool {
        let mut counters = self.counters.lock();
        if counters.started_at.is_some() {
            return false;
        }
        counters.started_at = Some(Instant::now());
        true
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.counters.lock().started_at
    }

    /// Counts one send acknowledgement and returns the new total.
    pub fn record_send_ack(&self) -> u64 {
        let mut counters = self.counters.lock();
        counters.send_times += 1;
        counters.send_times
    }

    /// Counts one receipt report against `expected_peers`.
    ///
    /// Exactly one call observes [`ReceiveOutcome::Completed`]: the first one
    /// that brings the count to `expected_peers` or beyond.
    pub fn record_received(&self, expected_peers: u64) -> ReceiveOutcome {
        let mut counters = self.counters.lock();
        counters.recv_times += 1;
        let received = counters.recv_times;

        if counters.completed {
            return ReceiveOutcome::Duplicate { received };
        }
        if received >= expected_peers {
            counters.completed = true;
            return ReceiveOutcome::Completed {
                received,
                elapsed: counters.started_at.map(|started| started.elapsed()),
            };
        }
        ReceiveOutcome::Counted {
            received,
            expected: expected_peers,
        }
    }

    pub fn snapshot_send_times(&self) -> u64 {
        self.counters.lock().send_times
    }

    pub fn snapshot_recv_times(&self) -> u64 {
        self.counters.lock().recv_times
    }

    pub fn is_completed(&self) -> bool {
        self.counters.lock().completed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_send_acks_accumulate() {
        let tracker = PeerCompletionTracker::new();
        assert_eq!(tracker.snapshot_send_times(), 0);
        tracker.record_send_ack();
        assert_eq!(tracker.record_send_ack(), 2);
        assert_eq!(tracker.snapshot_send_times(), 2);
        assert_eq!(tracker.snapshot_recv_times(), 0);
    }

    #[test]
    fn test_start_time_is_set_once() {
        let tracker = PeerCompletionTracker::new();
        assert!(tracker.mark_started());
        let first = tracker.started_at();
        assert!(!tracker.mark_started());
        assert_eq!(tracker.started_at(), first);
    }

    #[test]
    fn test_completion_fires_on_threshold_then_duplicates() {
        let tracker = PeerCompletionTracker::new();
        tracker.mark_started();

        assert_eq!(
            tracker.record_received(3),
            ReceiveOutcome::Counted {
                received: 1,
                expected: 3
            }
        );
        assert!(!tracker.record_received(3).just_completed());

        let third = tracker.record_received(3);
        assert!(third.just_completed());
        assert!(matches!(
            third,
            ReceiveOutcome::Completed {
                received: 3,
                elapsed: Some(_)
            }
        ));

        assert_eq!(
            tracker.record_received(3),
            ReceiveOutcome::Duplicate { received: 4 }
        );
        assert!(tracker.is_completed());
    }

    #[test]
    fn test_completion_without_start_has_no_elapsed() {
        let tracker = PeerCompletionTracker::new();
        assert_eq!(
            tracker.record_received(1),
            ReceiveOutcome::Completed {
                received: 1,
                elapsed: None
            }
        );
    }

    #[test]
    fn test_concurrent_reports_complete_exactly_once() {
        const PEERS: u64 = 64;
        let tracker = Arc::new(PeerCompletionTracker::new());

        let handles: Vec<_> = (0..PEERS + 8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    tracker.record_send_ack();
                    tracker.record_received(PEERS).just_completed()
                })
            })
            .collect();

        let completions = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|completed| *completed)
            .count();

        assert_eq!(completions, 1);
        assert_eq!(tracker.snapshot_recv_times(), PEERS + 8);
        assert_eq!(tracker.snapshot_send_times(), PEERS + 8);
    }
}
