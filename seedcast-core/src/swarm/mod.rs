//! Swarm engine contract and the in-process implementation
//!
//! A swarm engine seeds descriptors from piece stores and downloads them into
//! piece stores. Sessions are identified by handles; dropping a handle stops
//! the session and closes its piece feed.

pub mod direct;
pub mod feed;
pub mod progress;
pub mod stats;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
pub use direct::{DirectSwarm, DirectSwarmConfig};
pub use feed::{
    FeedEvent, PieceEvent, PieceStateFeed, PieceStateTable, PieceStatus, PieceSubscription,
};
pub use progress::ProgressReporter;
pub use stats::{StatsSnapshot, TransferStats, format_bytes};
use uuid::Uuid;

use crate::descriptor::{InfoHash, PieceIndex, TorrentDescriptor};
use crate::storage::{PieceStore, StorageError};

/// Errors from swarm engine operations.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("No session for {info_hash}")]
    NotFound { info_hash: InfoHash },

    /// No seed currently holds the piece
    #[error("Piece {index} of {info_hash} is not available")]
    PieceUnavailable { info_hash: InfoHash, index: PieceIndex },

    /// Piece store does not match the descriptor it is paired with
    #[error("Store holds {store} pieces, descriptor has {descriptor}")]
    StoreMismatch { store: u32, descriptor: u32 },

    #[error("Seed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Swarm engine is shut down")]
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmRole {
    Seeding,
    Downloading,
}

impl fmt::Display for SwarmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmRole::Seeding => write!(f, "seeding"),
            SwarmRole::Downloading => write!(f, "downloading"),
        }
    }
}

/// Identifies one engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmHandle {
    pub id: Uuid,
    pub info_hash: InfoHash,
    pub role: SwarmRole,
}

/// Everything a caller needs to follow a download.
pub struct DownloadSession {
    pub handle: SwarmHandle,
    pub feed: Arc<PieceStateTable>,
    pub stats: Arc<TransferStats>,
    pub store: Arc<dyn PieceStore>,
}

/// Presence of a descriptor in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwarmStatus {
    pub exists: bool,
    pub seeding: bool,
}

/// Transfer engine driven by distribution sessions and the control plane.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Starts serving every piece of `descriptor` from `store`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::StoreMismatch` - If the store does not fit the descriptor
    /// - `SwarmError::Shutdown` - If the engine is stopped
    async fn start_seeding(
        &self,
        descriptor: &TorrentDescriptor,
        store: Arc<dyn PieceStore>,
    ) -> Result<SwarmHandle, SwarmError>;

    /// Starts fetching every piece of `descriptor` into `store`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::StoreMismatch` - If the store does not fit the descriptor
    /// - `SwarmError::Shutdown` - If the engine is stopped
    async fn start_download(
        &self,
        descriptor: &TorrentDescriptor,
        store: Arc<dyn PieceStore>,
    ) -> Result<DownloadSession, SwarmError>;

    /// Stops a session. Returns false when the handle was already dropped.
    fn drop_session(&self, handle: &SwarmHandle) -> bool;

    fn status(&self, info_hash: &InfoHash) -> SwarmStatus;

    /// Current handles of every session for `info_hash`.
    fn sessions_for(&self, info_hash: &InfoHash) -> Vec<SwarmHandle>;

    /// Reads a piece any local session can serve.
    ///
    /// # Errors
    ///
    /// - `SwarmError::NotFound` - If no session exists for `info_hash`
    /// - `SwarmError::PieceUnavailable` - If no session holds the piece yet
    async fn read_seeded_piece(
        &self,
        info_hash: &InfoHash,
        index: PieceIndex,
    ) -> Result<Bytes, SwarmError>;
}
