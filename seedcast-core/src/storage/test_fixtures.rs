//! Artifact fixtures shared by unit and integration tests

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use super::{BackendSettings, FilesystemBackend, MemoryBackend, StorageBackend};
use crate::descriptor::DescriptorBuilder;

/// Deterministic artifact bytes; every piece hashes differently.
pub fn artifact_bytes(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<u8>>()
        .into()
}

/// Settings for an artifact named `artifact_name` under `base_dir`.
pub fn settings_for(base_dir: &Path, artifact_name: &str, piece_length: u32) -> BackendSettings {
    BackendSettings {
        base_dir: base_dir.to_path_buf(),
        artifact_name: artifact_name.to_string(),
        builder: DescriptorBuilder::new()
            .with_piece_length(piece_length)
            .with_announce_list(Vec::new()),
    }
}

/// Memory backend already holding `len` bytes of artifact data.
pub fn memory_backend(len: usize, piece_length: u32) -> (Arc<MemoryBackend>, Bytes) {
    let data = artifact_bytes(len);
    let settings = settings_for(Path::new("/nonexistent"), "model.bin", piece_length);
    (
        Arc::new(MemoryBackend::with_buffer(settings, data.clone())),
        data,
    )
}

/// Filesystem backend over a single artifact file in a fresh temp directory.
///
/// The returned `TempDir` must outlive the backend.
pub fn filesystem_backend(
    len: usize,
    piece_length: u32,
) -> std::io::Result<(TempDir, Arc<dyn StorageBackend>, Bytes)> {
    let temp_dir = TempDir::new()?;
    let data = artifact_bytes(len);
    std::fs::write(temp_dir.path().join("model.bin"), &data)?;
    let backend = FilesystemBackend::new(settings_for(temp_dir.path(), "model.bin", piece_length));
    Ok((temp_dir, Arc::new(backend), data))
}
