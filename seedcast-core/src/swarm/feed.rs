//! Piece-state change feed published by downloads
//!
//! State lives in a table; every change is also broadcast on a bounded
//! channel. Subscribers that fall behind get a `Lagged` event and must
//! re-read the table.

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::descriptor::PieceIndex;

/// Default number of buffered events per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    Pending,
    /// Requested from a seed, not yet verified
    Partial,
    /// Verified and written
    Complete,
}

/// One status change of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceEvent {
    pub index: PieceIndex,
    pub status: PieceStatus,
}

/// What a subscription yields next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Piece(PieceEvent),
    /// Events were dropped; current state must be re-read
    Lagged(u64),
    /// The publisher is gone, no further events will arrive
    Closed,
}

/// Live subscription to a piece-state feed; unsubscribes on drop.
#[derive(Debug)]
pub struct PieceSubscription {
    receiver: broadcast::Receiver<PieceEvent>,
}

impl PieceSubscription {
    pub fn new(receiver: broadcast::Receiver<PieceEvent>) -> Self {
        Self { receiver }
    }

    /// Subscription to a feed that has already closed.
    pub fn closed() -> Self {
        let (sender, receiver) = broadcast::channel(1);
        drop(sender);
        Self { receiver }
    }

    /// Waits for the next event.
    pub async fn next(&mut self) -> FeedEvent {
        match self.receiver.recv().await {
            Ok(event) => FeedEvent::Piece(event),
            Err(RecvError::Lagged(skipped)) => FeedEvent::Lagged(skipped),
            Err(RecvError::Closed) => FeedEvent::Closed,
        }
    }
}

/// Source of piece-state changes for one download.
///
/// Consumers subscribe before reading [`PieceStateFeed::status`]; every
/// change made after `subscribe` returns is delivered to the subscription.
pub trait PieceStateFeed: Send + Sync {
    fn subscribe(&self) -> PieceSubscription;

    /// Current status, `None` for an index past the last piece.
    fn status(&self, index: PieceIndex) -> Option<PieceStatus>;

    fn piece_count(&self) -> u32;
}

/// Piece-state table plus its change broadcast.
#[derive(Debug)]
pub struct PieceStateTable {
    states: RwLock<Vec<PieceStatus>>,
    sender: Mutex<Option<broadcast::Sender<PieceEvent>>>,
}

impl PieceStateTable {
    /// Creates a table with every piece pending.
    pub fn new(piece_count: u32) -> Self {
        Self::with_capacity(piece_count, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(piece_count: u32, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            states: RwLock::new(vec![PieceStatus::Pending; piece_count as usize]),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Creates a table with every piece already complete.
    pub fn completed(piece_count: u32) -> Self {
        let table = Self::new(piece_count);
        table.states.write().fill(PieceStatus::Complete);
        table
    }

    /// Updates a piece and publishes the change.
    ///
    /// Returns false when the index is out of range or the status is unchanged.
    pub fn set(&self, index: PieceIndex, status: PieceStatus) -> bool {
        let mut states = self.states.write();
        let Some(slot) = states.get_mut(index.as_u32() as usize) else {
            return false;
        };
        if *slot == status {
            return false;
        }
        *slot = status;
        // Published under the write lock so events for one piece stay ordered.
        self.publish(PieceEvent { index, status });
        true
    }

    /// Stops publishing; open subscriptions observe `FeedEvent::Closed`.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn count(&self, status: PieceStatus) -> u32 {
        self.states.read().iter().filter(|s| **s == status).count() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.states
            .read()
            .iter()
            .all(|s| *s == PieceStatus::Complete)
    }

    /// Marks the first pending piece at or after `from` as partial and returns it.
    ///
    /// Search wraps around; `None` when no piece is pending.
    pub fn claim_pending(&self, from: u32) -> Option<PieceIndex> {
        let mut states = self.states.write();
        let len = states.len();
        let position = (0..len)
            .map(|offset| (from as usize + offset) % len)
            .find(|i| states[*i] == PieceStatus::Pending)?;

        states[position] = PieceStatus::Partial;
        let index = PieceIndex::new(position as u32);
        self.publish(PieceEvent {
            index,
            status: PieceStatus::Partial,
        });
        Some(index)
    }

    fn publish(&self, event: PieceEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // No receivers is fine.
            let _ = sender.send(event);
        }
    }
}

impl PieceStateFeed for PieceStateTable {
    fn subscribe(&self) -> PieceSubscription {
        match self.sender.lock().as_ref() {
            Some(sender) => PieceSubscription::new(sender.subscribe()),
            None => PieceSubscription::closed(),
        }
    }

    fn status(&self, index: PieceIndex) -> Option<PieceStatus> {
        self.states.read().get(index.as_u32() as usize).copied()
    }

    fn piece_count(&self) -> u32 {
        self.states.read().len() as u32
    }
}
