//! Waiting for a range of pieces to complete
//!
//! The waiter subscribes to the piece feed before it reads current piece
//! states. Any completion after the subscription is delivered as an event,
//! and anything earlier is already visible in the states, so no completion
//! falls between the two steps.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::descriptor::PieceIndex;
use crate::swarm::{FeedEvent, PieceStateFeed, PieceStatus};

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every piece in the range is complete
    Completed,
    /// The cancellation token fired first
    Cancelled,
    /// The feed closed with pieces still outstanding
    FeedClosed { remaining: usize },
}

/// Waits until every piece in `[begin, end)` is complete.
pub struct PieceCompletionWaiter<F: ?Sized> {
    feed: Arc<F>,
    range: Range<u32>,
}

impl<F: PieceStateFeed + ?Sized> PieceCompletionWaiter<F> {
    /// Waiter over `range`, clamped to the feed's piece count.
    pub fn new(feed: Arc<F>, range: Range<u32>) -> Self {
        let end = range.end.min(feed.piece_count());
        let begin = range.start.min(end);
        Self {
            feed,
            range: begin..end,
        }
    }

    /// Waiter over every piece of the feed.
    pub fn all(feed: Arc<F>) -> Self {
        let count = feed.piece_count();
        Self::new(feed, 0..count)
    }

    pub fn range(&self) -> Range<u32> {
        self.range.clone()
    }

    /// Waits for completion or cancellation.
    ///
    /// The subscription is released on every return path.
    pub async fn wait(&self, cancel: &CancellationToken) -> WaitOutcome {
        let mut subscription = self.feed.subscribe();
        let mut pending = self.incomplete_in_range();

        loop {
            if pending.is_empty() {
                return WaitOutcome::Completed;
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return WaitOutcome::Cancelled,
                event = subscription.next() => event,
            };

            match event {
                FeedEvent::Piece(event) => {
                    if event.status == PieceStatus::Complete {
                        pending.remove(&event.index.as_u32());
                    }
                }
                FeedEvent::Lagged(skipped) => {
                    tracing::debug!("Piece feed lagged by {skipped} events, rechecking states");
                    self.retain_incomplete(&mut pending);
                }
                FeedEvent::Closed => {
                    self.retain_incomplete(&mut pending);
                    if pending.is_empty() {
                        return WaitOutcome::Completed;
                    }
                    return WaitOutcome::FeedClosed {
                        remaining: pending.len(),
                    };
                }
            }
        }
    }

    fn incomplete_in_range(&self) -> BTreeSet<u32> {
        self.range
            .clone()
            .filter(|index| !self.is_complete(*index))
            .collect()
    }

    fn retain_incomplete(&self, pending: &mut BTreeSet<u32>) {
        pending.retain(|index| !self.is_complete(*index));
    }

    fn is_complete(&self, index: u32) -> bool {
        self.feed.status(PieceIndex::new(index)) == Some(PieceStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::swarm::{PieceStateTable, PieceSubscription};

    const LIMIT: Duration = Duration::from_secs(5);

    /// Completes one piece right after handing out a subscription while
    /// `status` keeps reporting that piece as pending.
    struct CompletesDuringSubscribe {
        table: PieceStateTable,
        racing: PieceIndex,
    }

    impl PieceStateFeed for CompletesDuringSubscribe {
        fn subscribe(&self) -> PieceSubscription {
            let subscription = self.table.subscribe();
            self.table.set(self.racing, PieceStatus::Complete);
            subscription
        }

        fn status(&self, index: PieceIndex) -> Option<PieceStatus> {
            if index == self.racing {
                return Some(PieceStatus::Pending);
            }
            self.table.status(index)
        }

        fn piece_count(&self) -> u32 {
            self.table.piece_count()
        }
    }

    #[tokio::test]
    async fn test_completion_between_subscribe_and_snapshot_is_seen() {
        let feed = Arc::new(CompletesDuringSubscribe {
            table: PieceStateTable::new(3),
            racing: PieceIndex::new(1),
        });
        feed.table.set(PieceIndex::new(0), PieceStatus::Complete);
        feed.table.set(PieceIndex::new(2), PieceStatus::Complete);

        let waiter = PieceCompletionWaiter::all(feed);
        let outcome = tokio::time::timeout(LIMIT, waiter.wait(&CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn test_waits_for_every_piece_in_range() {
        let feed = Arc::new(PieceStateTable::new(6));
        let waiter = PieceCompletionWaiter::new(Arc::clone(&feed), 2..5);
        let cancel = CancellationToken::new();

        let publisher = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move {
                for index in [0u32, 4, 5, 2] {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    feed.set(PieceIndex::new(index), PieceStatus::Partial);
                    feed.set(PieceIndex::new(index), PieceStatus::Complete);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                feed.set(PieceIndex::new(3), PieceStatus::Complete);
            })
        };

        let outcome = tokio::time::timeout(LIMIT, waiter.wait(&cancel)).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
        assert_eq!(feed.status(PieceIndex::new(3)), Some(PieceStatus::Complete));
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_already_complete_range_returns_immediately() {
        let feed = Arc::new(PieceStateTable::completed(4));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let waiter = PieceCompletionWaiter::all(feed);
        assert_eq!(waiter.wait(&cancel).await, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_ends_wait() {
        let feed = Arc::new(PieceStateTable::new(2));
        let waiter = PieceCompletionWaiter::all(Arc::clone(&feed));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let outcome = tokio::time::timeout(LIMIT, waiter.wait(&cancel)).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_lagged_subscription_rechecks_states() {
        let feed = Arc::new(PieceStateTable::with_capacity(16, 1));
        let waiter = PieceCompletionWaiter::all(Arc::clone(&feed));
        let cancel = CancellationToken::new();

        let wait = tokio::spawn({
            let cancel = cancel.clone();
            async move { waiter.wait(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        for index in 0..16 {
            feed.set(PieceIndex::new(index), PieceStatus::Complete);
        }

        let outcome = tokio::time::timeout(LIMIT, wait).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn test_closed_feed_reports_remaining() {
        let feed = Arc::new(PieceStateTable::new(3));
        feed.set(PieceIndex::new(0), PieceStatus::Complete);
        feed.close();

        let waiter = PieceCompletionWaiter::all(feed);
        let outcome = waiter.wait(&CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::FeedClosed { remaining: 2 });
    }

    #[test]
    fn test_range_is_clamped_to_piece_count() {
        let feed = Arc::new(PieceStateTable::new(4));
        let waiter = PieceCompletionWaiter::new(feed, 2..10);
        assert_eq!(waiter.range(), 2..4);
    }
}
