//! Seedcast Core - swarm distribution of one large artifact to a fixed set of peers
//!
//! This crate provides storage backends, descriptor construction, an
//! in-process swarm engine, and the synchronization primitives that tell an
//! origin when every peer has the artifact and a peer when its own download
//! is complete.

pub mod completion;
pub mod config;
pub mod descriptor;
pub mod download;
pub mod session;
pub mod storage;
pub mod swarm;
pub mod tracing_setup;
pub mod waiter;

// Re-export main types for convenient access
pub use completion::{PeerCompletionTracker, ReceiveOutcome};
pub use config::{ConfigError, SeedcastConfig};
pub use descriptor::{DescriptorError, InfoHash, PieceIndex, TorrentDescriptor};
pub use download::{DownloadError, DownloadReport, download_descriptor};
pub use session::{DistributionSession, PublishedDescriptor, SessionError, SessionState};
pub use storage::{StorageBackend, StorageError, StorageMethod, select_backend};
pub use swarm::{DirectSwarm, DirectSwarmConfig, SwarmEngine, SwarmError};
pub use waiter::{PieceCompletionWaiter, WaitOutcome};

/// Errors that can bubble up from any Seedcast subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SeedcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeedcastError {
    /// True when the failure comes from an unsupported storage method.
    pub fn is_unsupported_backend(&self) -> bool {
        match self {
            SeedcastError::Storage(e)
            | SeedcastError::Session(SessionError::Storage(e))
            | SeedcastError::Download(DownloadError::Storage(e))
            | SeedcastError::Swarm(SwarmError::Storage(e)) => e.is_unsupported(),
            _ => false,
        }
    }

    /// True when a peer sent something that is not a descriptor.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            SeedcastError::Descriptor(DescriptorError::Decode { .. })
                | SeedcastError::Session(SessionError::Descriptor(DescriptorError::Decode { .. }))
        )
    }

    /// True when work stopped because of cancellation or abort.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            SeedcastError::Session(SessionError::Aborted)
                | SeedcastError::Download(DownloadError::Cancelled)
                | SeedcastError::Swarm(SwarmError::Shutdown)
        )
    }
}

pub type Result<T> = std::result::Result<T, SeedcastError>;
