//! In-memory backend: the artifact lives in one shared buffer

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use super::{BackendSettings, DataSource, PieceStore, StorageBackend, StorageError, StorageMethod};
use crate::descriptor::{PieceIndex, TorrentDescriptor};

/// Backend that hashes and serves an artifact held in memory.
///
/// The artifact is read from `base_dir/artifact_name` once; a failed read
/// leaves the cell empty so a later call can retry.
pub struct MemoryBackend {
    settings: BackendSettings,
    buffer: OnceCell<Bytes>,
}

impl MemoryBackend {
    /// Creates a backend that loads its buffer lazily.
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings,
            buffer: OnceCell::new(),
        }
    }

    /// Creates a backend around bytes that are already resident.
    pub fn with_buffer(settings: BackendSettings, buffer: Bytes) -> Self {
        Self {
            settings,
            buffer: OnceCell::new_with(Some(buffer)),
        }
    }

    /// Loads the artifact into memory if it is not loaded yet.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the artifact could not be read
    pub async fn load(&self) -> Result<Bytes, StorageError> {
        let buffer = self
            .buffer
            .get_or_try_init(|| async {
                let path = self.settings.artifact_path();
                let data = tokio::fs::read(&path).await?;
                tracing::info!("Read {} bytes from {}", data.len(), path.display());
                Ok::<_, StorageError>(Bytes::from(data))
            })
            .await?;
        Ok(buffer.clone())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn method(&self) -> StorageMethod {
        StorageMethod::Memory
    }

    async fn source(&self) -> Result<DataSource, StorageError> {
        Ok(DataSource::InMemoryBuffer(self.load().await?))
    }

    async fn create_descriptor(
        &self,
        source: &DataSource,
    ) -> Result<TorrentDescriptor, StorageError> {
        let DataSource::InMemoryBuffer(buffer) = source else {
            return Err(StorageError::SourceMismatch {
                backend: StorageMethod::Memory,
                actual: source.kind(),
            });
        };

        let descriptor = self
            .settings
            .builder
            .create_from_memory(&self.settings.artifact_name, buffer.clone())
            .await?;
        tracing::debug!(
            info_hash = %descriptor.info_hash,
            "Described {} bytes held in memory",
            descriptor.total_length
        );
        Ok(descriptor)
    }

    async fn materialize(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        let buffer = self.load().await?;
        if buffer.len() as u64 != descriptor.total_length {
            return Err(StorageError::DescriptorMismatch {
                reason: format!(
                    "descriptor covers {} bytes, buffer holds {}",
                    descriptor.total_length,
                    buffer.len()
                ),
            });
        }
        Ok(Arc::new(MemoryPieceStore::shared(descriptor, buffer)))
    }

    async fn download_target(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        Ok(Arc::new(MemoryPieceStore::zeroed(descriptor)?))
    }
}

enum MemoryBuf {
    /// Origin buffer, served without copying
    Shared(Bytes),
    /// Download buffer filled piece by piece
    Owned(RwLock<Vec<u8>>),
}

/// Piece store over a single contiguous buffer.
pub struct MemoryPieceStore {
    piece_length: u64,
    piece_count: u32,
    total_length: u64,
    buf: MemoryBuf,
}

impl MemoryPieceStore {
    /// Serves pieces out of an existing buffer.
    pub fn shared(descriptor: &TorrentDescriptor, buffer: Bytes) -> Self {
        Self {
            piece_length: u64::from(descriptor.piece_length),
            piece_count: descriptor.piece_count(),
            total_length: descriptor.total_length,
            buf: MemoryBuf::Shared(buffer),
        }
    }

    /// Allocates a zeroed buffer for a download.
    ///
    /// # Errors
    ///
    /// - `StorageError::Allocation` - If the declared length cannot be held in memory
    pub fn zeroed(descriptor: &TorrentDescriptor) -> Result<Self, StorageError> {
        let length = descriptor.total_length;
        let len = usize::try_from(length).map_err(|_| StorageError::Allocation {
            length,
            reason: "exceeds the address space".to_string(),
        })?;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|e| StorageError::Allocation {
                length,
                reason: e.to_string(),
            })?;
        buffer.resize(len, 0);

        Ok(Self {
            piece_length: u64::from(descriptor.piece_length),
            piece_count: descriptor.piece_count(),
            total_length: length,
            buf: MemoryBuf::Owned(RwLock::new(buffer)),
        })
    }

    /// Snapshot of the whole buffer.
    pub fn contents(&self) -> Bytes {
        match &self.buf {
            MemoryBuf::Shared(bytes) => bytes.clone(),
            MemoryBuf::Owned(data) => Bytes::copy_from_slice(&data.read()),
        }
    }

    fn piece_range(&self, index: PieceIndex) -> Result<std::ops::Range<usize>, StorageError> {
        if index.as_u32() >= self.piece_count {
            return Err(StorageError::PieceOutOfRange { index });
        }
        let start = u64::from(index.as_u32()) * self.piece_length;
        let end = (start + self.piece_length).min(self.total_length);
        Ok(start as usize..end as usize)
    }
}

#[async_trait]
impl PieceStore for MemoryPieceStore {
    async fn read_piece(&self, index: PieceIndex) -> Result<Bytes, StorageError> {
        let range = self.piece_range(index)?;
        match &self.buf {
            MemoryBuf::Shared(bytes) => Ok(bytes.slice(range)),
            MemoryBuf::Owned(data) => Ok(Bytes::copy_from_slice(&data.read()[range])),
        }
    }

    async fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError> {
        let range = self.piece_range(index)?;
        if range.len() != piece.len() {
            return Err(StorageError::PieceOutOfRange { index });
        }
        match &self.buf {
            MemoryBuf::Shared(_) => Err(StorageError::ReadOnly),
            MemoryBuf::Owned(data) => {
                data.write()[range].copy_from_slice(piece);
                Ok(())
            }
        }
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn location(&self) -> Option<PathBuf> {
        None
    }
}
