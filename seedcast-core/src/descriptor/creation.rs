//! Descriptor construction from in-memory buffers and filesystem paths
//!
//! Splits content into fixed-size pieces, hashes each piece with SHA-1 and
//! assembles the descriptor. Directory sources are walked depth-first and
//! pieces run continuously across file boundaries.

use std::path::Path;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::codec::compute_info_hash;
use super::{DescriptorError, DescriptorFile, TorrentDescriptor};

/// Smallest piece length handed out by automatic sizing (16 KiB)
pub const MIN_PIECE_LENGTH: u32 = 16_384;

/// Automatic sizing doubles the piece length until fewer pieces than this remain
const TARGET_MAX_PIECES: u64 = 2048;

/// Public trackers written into descriptors when none are configured
pub const DEFAULT_ANNOUNCE_LIST: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "udp://tracker.moeking.me:6969/announce",
    "udp://p4p.arenabg.com:1337/announce",
];

/// Picks a power-of-two piece length for `total_length` bytes.
pub fn choose_piece_length(total_length: u64) -> u32 {
    let mut piece_length = u64::from(MIN_PIECE_LENGTH);
    let max_piece_length = u64::from(u32::MAX / 2);
    while total_length / piece_length >= TARGET_MAX_PIECES && piece_length < max_piece_length {
        piece_length *= 2;
    }
    piece_length as u32
}

/// Builds descriptors with a fixed piece length and tracker list.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    /// Fixed piece length, `None` for automatic sizing
    piece_length: Option<u32>,
    announce_list: Vec<Vec<String>>,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorBuilder {
    /// Creates a builder with automatic piece sizing and the default trackers.
    pub fn new() -> Self {
        Self {
            piece_length: None,
            announce_list: DEFAULT_ANNOUNCE_LIST
                .iter()
                .map(|url| vec![url.to_string()])
                .collect(),
        }
    }

    /// Uses a fixed piece length. Zero selects automatic sizing.
    pub fn with_piece_length(mut self, piece_length: u32) -> Self {
        self.piece_length = (piece_length > 0).then_some(piece_length);
        self
    }

    /// Replaces the tracker tiers written into descriptors.
    pub fn with_announce_list(mut self, announce_list: Vec<Vec<String>>) -> Self {
        self.announce_list = announce_list;
        self
    }

    fn piece_length_for(&self, total_length: u64) -> u32 {
        self.piece_length
            .unwrap_or_else(|| choose_piece_length(total_length))
    }

    /// Describes an in-memory buffer.
    ///
    /// Hashing runs on the blocking pool so large buffers do not stall the
    /// async executor. The buffer itself is shared, not copied.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::InvalidSource` - If the buffer is empty
    pub async fn create_from_memory(
        &self,
        name: &str,
        buffer: Bytes,
    ) -> Result<TorrentDescriptor, DescriptorError> {
        if buffer.is_empty() {
            return Err(DescriptorError::InvalidSource {
                reason: "Cannot describe an empty buffer".to_string(),
            });
        }

        let total_length = buffer.len() as u64;
        let piece_length = self.piece_length_for(total_length);
        let piece_hashes = tokio::task::spawn_blocking(move || {
            buffer
                .chunks(piece_length as usize)
                .map(hash_piece)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| DescriptorError::InvalidSource {
            reason: format!("hashing task failed: {e}"),
        })?;

        let files = vec![DescriptorFile {
            path: vec![name.to_string()],
            length: total_length,
        }];
        self.assemble(name, piece_length, piece_hashes, total_length, files)
    }

    /// Describes a file or a directory tree.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Io` - File or directory read error
    /// - `DescriptorError::InvalidSource` - Missing path, empty file or empty directory
    pub async fn create_from_path(
        &self,
        path: &Path,
    ) -> Result<TorrentDescriptor, DescriptorError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DescriptorError::InvalidSource {
                reason: format!("Cannot read {}: {e}", path.display()),
            })?;

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DescriptorError::InvalidSource {
                reason: format!("Invalid file name: {}", path.display()),
            })?
            .to_string();

        if metadata.is_dir() {
            self.create_from_directory(path, name).await
        } else {
            self.create_from_file(path, name, metadata.len()).await
        }
    }

    async fn create_from_file(
        &self,
        file_path: &Path,
        name: String,
        file_size: u64,
    ) -> Result<TorrentDescriptor, DescriptorError> {
        if file_size == 0 {
            return Err(DescriptorError::InvalidSource {
                reason: "Cannot describe an empty file".to_string(),
            });
        }

        let piece_length = self.piece_length_for(file_size);
        let files = vec![DescriptorFile {
            path: vec![name.clone()],
            length: file_size,
        }];
        let base_dir = file_path.parent().unwrap_or(Path::new("."));
        let piece_hashes = hash_files(base_dir, &files, piece_length).await?;

        self.assemble(&name, piece_length, piece_hashes, file_size, files)
    }

    async fn create_from_directory(
        &self,
        directory_path: &Path,
        name: String,
    ) -> Result<TorrentDescriptor, DescriptorError> {
        let relative_files = collect_files_recursively(directory_path).await?;
        let total_length: u64 = relative_files.iter().map(|f| f.length).sum();
        if total_length == 0 {
            return Err(DescriptorError::InvalidSource {
                reason: format!("Directory has no content: {}", directory_path.display()),
            });
        }

        let files: Vec<DescriptorFile> = relative_files
            .into_iter()
            .map(|file| DescriptorFile {
                path: std::iter::once(name.clone()).chain(file.path).collect(),
                length: file.length,
            })
            .collect();

        let piece_length = self.piece_length_for(total_length);
        let base_dir = directory_path.parent().unwrap_or(Path::new("."));
        let piece_hashes = hash_files(base_dir, &files, piece_length).await?;

        self.assemble(&name, piece_length, piece_hashes, total_length, files)
    }

    fn assemble(
        &self,
        name: &str,
        piece_length: u32,
        piece_hashes: Vec<[u8; 20]>,
        total_length: u64,
        files: Vec<DescriptorFile>,
    ) -> Result<TorrentDescriptor, DescriptorError> {
        let info_hash = compute_info_hash(name, piece_length, &piece_hashes, &files)?;
        Ok(TorrentDescriptor {
            info_hash,
            name: name.to_string(),
            piece_length,
            piece_hashes,
            total_length,
            files,
            announce_list: self.announce_list.clone(),
        })
    }
}

fn hash_piece(piece: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Sha1::digest(piece));
    hash
}

/// Hashes pieces that run continuously across `files`, resolved under `base_dir`.
async fn hash_files(
    base_dir: &Path,
    files: &[DescriptorFile],
    piece_length: u32,
) -> Result<Vec<[u8; 20]>, DescriptorError> {
    let piece_length = piece_length as usize;
    let mut piece_hashes = Vec::new();
    let mut piece_buffer = Vec::with_capacity(piece_length);

    for descriptor_file in files {
        let file_path = descriptor_file
            .path
            .iter()
            .fold(base_dir.to_path_buf(), |path, component| path.join(component));
        let mut file = File::open(&file_path).await?;
        let mut remaining_in_file = descriptor_file.length;

        while remaining_in_file > 0 {
            let space_in_piece = piece_length - piece_buffer.len();
            let to_read = (remaining_in_file.min(space_in_piece as u64)) as usize;

            let start = piece_buffer.len();
            piece_buffer.resize(start + to_read, 0);
            file.read_exact(&mut piece_buffer[start..]).await?;
            remaining_in_file -= to_read as u64;

            if piece_buffer.len() == piece_length {
                piece_hashes.push(hash_piece(&piece_buffer));
                piece_buffer.clear();
            }
        }
    }

    if !piece_buffer.is_empty() {
        piece_hashes.push(hash_piece(&piece_buffer));
    }

    Ok(piece_hashes)
}

/// Collects all files in directory using iterative depth-first traversal.
///
/// Hidden and editor backup entries are skipped. Paths are relative to
/// `directory_path` and sorted for a deterministic piece order.
async fn collect_files_recursively(
    directory_path: &Path,
) -> Result<Vec<DescriptorFile>, DescriptorError> {
    let mut files = Vec::new();
    let mut dirs_to_process = vec![directory_path.to_path_buf()];

    while let Some(current_dir) = dirs_to_process.pop() {
        let mut entries = tokio::fs::read_dir(&current_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || name.starts_with('~') {
                continue;
            }

            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                dirs_to_process.push(path);
            } else if metadata.is_file() {
                let relative_path = path.strip_prefix(directory_path).map_err(|_| {
                    DescriptorError::InvalidSource {
                        reason: "Failed to create relative path".to_string(),
                    }
                })?;

                files.push(DescriptorFile {
                    path: relative_path
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect(),
                    length: metadata.len(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
