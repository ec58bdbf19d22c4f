//! Storage backends for distributed artifacts.
//!
//! A backend is chosen once at startup from the configured storage method and
//! decides how source bytes become a descriptor and how pieces are
//! materialized for the swarm engine. Three variants exist: an in-memory
//! buffer, a filesystem tree (tmpfs in the usual deployment), and the disk
//! variant, which is rejected on every operation.

pub mod filesystem;
pub mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod unsupported;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
pub use filesystem::{FilePieceStore, FilesystemBackend};
pub use memory::{MemoryBackend, MemoryPieceStore};
pub use unsupported::UnsupportedBackend;

use crate::descriptor::{DescriptorBuilder, DescriptorError, PieceIndex, TorrentDescriptor};

/// Where the source bytes of an artifact live.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Bytes already resident in process memory
    InMemoryBuffer(Bytes),
    /// A file or directory tree
    FilesystemPath(PathBuf),
}

impl DataSource {
    /// Short label used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::InMemoryBuffer(_) => "memory buffer",
            DataSource::FilesystemPath(_) => "filesystem path",
        }
    }
}

/// Storage method resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMethod {
    /// Serve pieces straight from an in-memory buffer
    Memory,
    /// Serve pieces from files (tmpfs or any mounted filesystem)
    Filesystem,
    /// Disk-backed piece storage, not supported
    Disk,
    /// Any other configured value
    Unrecognized(String),
}

impl StorageMethod {
    /// Resolves a configured method name, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            "tmpfs" | "filesystem" | "fs" => Self::Filesystem,
            "disk" => Self::Disk,
            _ => Self::Unrecognized(name.to_string()),
        }
    }

    /// Returns true for methods with a working backend.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Memory | Self::Filesystem)
    }
}

impl fmt::Display for StorageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Filesystem => write!(f, "tmpfs"),
            Self::Disk => write!(f, "disk"),
            Self::Unrecognized(name) => write!(f, "unrecognized({name})"),
        }
    }
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The configured storage method has no working backend
    #[error("Storage method {method} is not supported")]
    Unsupported {
        /// Method that was rejected
        method: StorageMethod,
    },

    /// A data source of the wrong kind was handed to a backend
    #[error("{backend} backend cannot use a {actual} source")]
    SourceMismatch {
        backend: StorageMethod,
        actual: &'static str,
    },

    /// Piece index outside the descriptor
    #[error("Piece {index} out of range")]
    PieceOutOfRange { index: PieceIndex },

    /// Attempted to write into a store that only serves pieces
    #[error("Piece store is read-only")]
    ReadOnly,

    /// Descriptor does not match the bytes the backend holds
    #[error("Descriptor mismatch: {reason}")]
    DescriptorMismatch { reason: String },

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A download buffer of the declared length could not be allocated
    #[error("Cannot allocate {length} bytes: {reason}")]
    Allocation { length: u64, reason: String },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True when the error comes from an unsupported storage method.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::Unsupported { .. })
    }
}

/// Materialized piece storage handed to the swarm engine.
///
/// Seeding stores serve pieces; download stores additionally accept verified
/// pieces. Indices are checked against the descriptor the store was created
/// for.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Reads one complete piece.
    ///
    /// # Errors
    ///
    /// - `StorageError::PieceOutOfRange` - If the index is past the last piece
    /// - `StorageError::Io` - If a backing file could not be read
    async fn read_piece(&self, index: PieceIndex) -> Result<Bytes, StorageError>;

    /// Writes one complete, already verified piece.
    ///
    /// # Errors
    ///
    /// - `StorageError::ReadOnly` - If the store only serves pieces
    /// - `StorageError::PieceOutOfRange` - If the index or length is wrong
    /// - `StorageError::Io` - If a backing file could not be written
    async fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError>;

    /// Number of pieces the store holds.
    fn piece_count(&self) -> u32;

    /// Filesystem location of the content, if it lives on a filesystem.
    fn location(&self) -> Option<PathBuf>;
}

/// How the process turns source data into descriptors and piece stores.
///
/// Selected once at startup via [`select_backend`]; request handlers hold a
/// shared reference and never re-decide the method.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Storage method this backend implements.
    fn method(&self) -> StorageMethod;

    /// Source data bound to this backend at startup.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the source could not be loaded
    /// - `StorageError::Unsupported` - For the disk variant
    async fn source(&self) -> Result<DataSource, StorageError>;

    /// Hashes source content into a descriptor.
    ///
    /// # Errors
    ///
    /// - `StorageError::SourceMismatch` - Source kind not handled by this backend
    /// - `StorageError::Descriptor` - Empty or unreadable source
    /// - `StorageError::Unsupported` - For the disk variant
    async fn create_descriptor(
        &self,
        source: &DataSource,
    ) -> Result<TorrentDescriptor, StorageError>;

    /// Produces the piece store the swarm engine seeds from.
    ///
    /// # Errors
    ///
    /// - `StorageError::DescriptorMismatch` - Descriptor does not fit the held data
    /// - `StorageError::Unsupported` - For the disk variant
    async fn materialize(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError>;

    /// Produces an empty piece store a download writes into.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If target files could not be prepared
    /// - `StorageError::Unsupported` - For the disk variant
    async fn download_target(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError>;
}

/// Source location and descriptor settings used to build a backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Directory holding the artifact; download targets are created here too
    pub base_dir: PathBuf,
    /// File or directory name of the artifact inside `base_dir`
    pub artifact_name: String,
    /// Builder carrying piece length and trackers
    pub builder: DescriptorBuilder,
}

impl BackendSettings {
    /// Full path of the artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.base_dir.join(&self.artifact_name)
    }
}

/// Resolves the storage method into a backend, once, at startup.
///
/// The memory backend tries to load the artifact immediately; a failed load
/// is logged and retried on first use. Disk and unrecognized methods yield an
/// [`UnsupportedBackend`] that rejects every operation.
pub async fn select_backend(
    method: &StorageMethod,
    settings: BackendSettings,
) -> Arc<dyn StorageBackend> {
    match method {
        StorageMethod::Memory => {
            let backend = MemoryBackend::new(settings);
            if let Err(e) = backend.load().await {
                tracing::error!("Failed to preload artifact into memory: {e}");
            }
            Arc::new(backend)
        }
        StorageMethod::Filesystem => Arc::new(FilesystemBackend::new(settings)),
        StorageMethod::Disk | StorageMethod::Unrecognized(_) => {
            tracing::warn!("Storage method {method} has no backend; every operation will fail");
            Arc::new(UnsupportedBackend::new(method.clone()))
        }
    }
}
