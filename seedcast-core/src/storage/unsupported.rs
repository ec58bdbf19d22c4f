//! Backend for storage methods without an implementation (disk, unknown names)

use std::sync::Arc;

use async_trait::async_trait;

use super::{DataSource, PieceStore, StorageBackend, StorageError, StorageMethod};
use crate::descriptor::TorrentDescriptor;

/// Rejects every operation with `StorageError::Unsupported`.
#[derive(Debug, Clone)]
pub struct UnsupportedBackend {
    method: StorageMethod,
}

impl UnsupportedBackend {
    pub fn new(method: StorageMethod) -> Self {
        Self { method }
    }

    fn reject<T>(&self) -> Result<T, StorageError> {
        Err(StorageError::Unsupported {
            method: self.method.clone(),
        })
    }
}

#[async_trait]
impl StorageBackend for UnsupportedBackend {
    fn method(&self) -> StorageMethod {
        self.method.clone()
    }

    async fn source(&self) -> Result<DataSource, StorageError> {
        self.reject()
    }

    async fn create_descriptor(
        &self,
        _source: &DataSource,
    ) -> Result<TorrentDescriptor, StorageError> {
        self.reject()
    }

    async fn materialize(
        &self,
        _descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        self.reject()
    }

    async fn download_target(
        &self,
        _descriptor: &TorrentDescriptor,
    ) -> Result<Arc<dyn PieceStore>, StorageError> {
        self.reject()
    }
}
