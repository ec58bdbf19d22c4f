//! Filesystem backend: pieces are read from and written to files in place
//!
//! Intended for tmpfs mounts, where the artifact already sits in page cache
//! and the swarm engine can read pieces without a separate copy.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{BackendSettings, DataSource, PieceStore, StorageBackend, StorageError, StorageMethod};
use crate::descriptor::{PieceIndex, TorrentDescriptor};

/// Backend that describes and serves artifacts stored as files.
pub struct FilesystemBackend {
    settings: BackendSettings,
}

impl FilesystemBackend {
    /// Creates a backend rooted at `settings.base_dir`.
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn method(&self) -> StorageMethod {
        StorageMethod::Filesystem
    }

    async fn source(&self) -> Result<DataSource, StorageError> {
        Ok(DataSource::FilesystemPath(self.settings.artifact_path()))
    }

    async fn create_descriptor(
        &self,
        source: &DataSource,
    ) -> Result<TorrentDescriptor, StorageError> {
        let DataSource::FilesystemPath(path) = source else {
            return Err(StorageError::SourceMismatch {
                backend: StorageMethod::Filesystem,
                actual: source.kind(),
            });
        };

        let descriptor = self.settings.builder.create_from_path(path).await?;
        tracing::debug!(
            info_hash = %descriptor.info_hash,
            files = descriptor.files.len(),
            "Described {}",
            path.display()
        );
        Ok(descriptor)
    }

    async fn materialize(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        let store = FilePieceStore::new(&self.settings.base_dir, descriptor)?;
        store.check_lengths().await?;
        Ok(Arc::new(store))
    }

    async fn download_target(
        &self,
        descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        let store = FilePieceStore::new(&self.settings.base_dir, descriptor)?;
        store.allocate().await?;
        Ok(Arc::new(store))
    }
}

/// Piece store mapping pieces onto the descriptor's files under a base directory.
pub struct FilePieceStore {
    root: PathBuf,
    files: Vec<(PathBuf, u64)>,
    descriptor: TorrentDescriptor,
}

impl FilePieceStore {
    /// Lays the descriptor's files out under `base_dir`.
    ///
    /// # Errors
    ///
    /// - `StorageError::DescriptorMismatch` - If a file path would leave `base_dir`
    pub fn new(base_dir: &Path, descriptor: &TorrentDescriptor) -> Result<Self, StorageError> {
        let files = descriptor
            .files
            .iter()
            .map(|file| {
                let relative: PathBuf = file.path.iter().collect();
                let contained = !file.path.is_empty()
                    && relative
                        .components()
                        .all(|component| matches!(component, Component::Normal(_)))
                    && relative.components().count() == file.path.len();
                if !contained {
                    return Err(StorageError::DescriptorMismatch {
                        reason: format!("file path {:?} leaves the base directory", file.path),
                    });
                }
                Ok((base_dir.join(relative), file.length))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: base_dir.join(&descriptor.name),
            files,
            descriptor: descriptor.clone(),
        })
    }

    /// Verifies every file exists with the length the descriptor records.
    async fn check_lengths(&self) -> Result<(), StorageError> {
        for (path, length) in &self.files {
            let actual = tokio::fs::metadata(path).await?.len();
            if actual != *length {
                return Err(StorageError::DescriptorMismatch {
                    reason: format!(
                        "{} is {actual} bytes, descriptor expects {length}",
                        path.display()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Creates every file at its final length.
    async fn allocate(&self) -> Result<(), StorageError> {
        for (path, length) in &self.files {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)
                .await?;
            file.set_len(*length).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PieceStore for FilePieceStore {
    async fn read_piece(&self, index: PieceIndex) -> Result<Bytes, StorageError> {
        let size = self
            .descriptor
            .piece_size(index)
            .ok_or(StorageError::PieceOutOfRange { index })?;
        let mut piece = BytesMut::with_capacity(size as usize);

        for span in self.descriptor.file_spans(index) {
            let (path, _) = &self.files[span.file_index];
            let mut file = File::open(path).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let start = piece.len();
            piece.resize(start + span.length as usize, 0);
            file.read_exact(&mut piece[start..]).await?;
        }

        Ok(piece.freeze())
    }

    async fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError> {
        let size = self
            .descriptor
            .piece_size(index)
            .ok_or(StorageError::PieceOutOfRange { index })?;
        if size as usize != piece.len() {
            return Err(StorageError::PieceOutOfRange { index });
        }

        let mut written = 0usize;
        for span in self.descriptor.file_spans(index) {
            let (path, _) = &self.files[span.file_index];
            let mut file = OpenOptions::new().write(true).open(path).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let end = written + span.length as usize;
            file.write_all(&piece[written..end]).await?;
            file.flush().await?;
            written = end;
        }

        Ok(())
    }

    fn piece_count(&self) -> u32 {
        self.descriptor.piece_count()
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::descriptor::DescriptorBuilder;

    fn settings(base_dir: &Path, artifact_name: &str) -> BackendSettings {
        BackendSettings {
            base_dir: base_dir.to_path_buf(),
            artifact_name: artifact_name.to_string(),
            builder: DescriptorBuilder::new().with_piece_length(32),
        }
    }

    #[tokio::test]
    async fn test_seeding_store_reads_pieces_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        std::fs::write(temp_dir.path().join("model.pth"), &data).unwrap();

        let backend = FilesystemBackend::new(settings(temp_dir.path(), "model.pth"));
        let source = backend.source().await.unwrap();
        let descriptor = backend.create_descriptor(&source).await.unwrap();
        let store = backend.materialize(&descriptor).await.unwrap();

        assert_eq!(store.location(), Some(temp_dir.path().join("model.pth")));
        for index in 0..descriptor.piece_count() {
            let index = PieceIndex::new(index);
            let piece = store.read_piece(index).await.unwrap();
            assert!(descriptor.verify_piece(index, &piece));
        }
    }

    #[tokio::test]
    async fn test_download_target_reassembles_directory() {
        let origin = TempDir::new().unwrap();
        let root = origin.path().join("ckpt");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.bin"), vec![1u8; 50]).unwrap();
        std::fs::write(root.join("b.bin"), vec![2u8; 30]).unwrap();

        let seeding = FilesystemBackend::new(settings(origin.path(), "ckpt"));
        let descriptor = seeding
            .create_descriptor(&seeding.source().await.unwrap())
            .await
            .unwrap();
        let source_store = seeding.materialize(&descriptor).await.unwrap();

        let destination = TempDir::new().unwrap();
        let receiving = FilesystemBackend::new(settings(destination.path(), "ckpt"));
        let target = receiving.download_target(&descriptor).await.unwrap();

        for index in (0..descriptor.piece_count()).rev() {
            let index = PieceIndex::new(index);
            let piece = source_store.read_piece(index).await.unwrap();
            target.write_piece(index, &piece).await.unwrap();
        }

        let copied_a = std::fs::read(destination.path().join("ckpt").join("a.bin")).unwrap();
        let copied_b = std::fs::read(destination.path().join("ckpt").join("b.bin")).unwrap();
        assert_eq!(copied_a, vec![1u8; 50]);
        assert_eq!(copied_b, vec![2u8; 30]);
    }

    #[tokio::test]
    async fn test_download_target_refuses_paths_outside_base_dir() {
        let sandbox = TempDir::new().unwrap();
        let base_dir = sandbox.path().join("downloads");
        let mut descriptor = DescriptorBuilder::new()
            .with_piece_length(32)
            .create_from_memory("ckpt", Bytes::from(vec![9u8; 40]))
            .await
            .unwrap();
        descriptor.files[0].path = vec![
            "ckpt".to_string(),
            "..".to_string(),
            "..".to_string(),
            "escaped.bin".to_string(),
        ];

        let backend = FilesystemBackend::new(settings(&base_dir, "ckpt"));
        let result = backend.download_target(&descriptor).await;
        assert!(matches!(result, Err(StorageError::DescriptorMismatch { .. })));
        assert!(!sandbox.path().join("escaped.bin").exists());

        // The same bytes never decode in the first place.
        let encoded = descriptor.to_bytes().unwrap();
        assert!(TorrentDescriptor::from_bytes(&encoded).is_err());
    }

    #[tokio::test]
    async fn test_materialize_rejects_changed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.pth");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let backend = FilesystemBackend::new(settings(temp_dir.path(), "model.pth"));
        let descriptor = backend
            .create_descriptor(&DataSource::FilesystemPath(path.clone()))
            .await
            .unwrap();
        std::fs::write(&path, vec![0u8; 10]).unwrap();

        let result = backend.materialize(&descriptor).await;
        assert!(matches!(result, Err(StorageError::DescriptorMismatch { .. })));
    }
}
