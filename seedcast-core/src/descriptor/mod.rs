//! Content-addressed descriptors for distributed artifacts
//!
//! A descriptor is the immutable manifest peers need to fetch and verify an
//! artifact: its identity hash, piece size and piece hashes, total length,
//! file layout and tracker list.

pub mod codec;
pub mod creation;

use std::fmt;

use sha1::{Digest, Sha1};

pub use creation::{DEFAULT_ANNOUNCE_LIST, DescriptorBuilder, MIN_PIECE_LENGTH, choose_piece_length};

/// SHA-1 hash identifying a descriptor.
///
/// 20-byte SHA-1 of the bencoded info dictionary. Two descriptors with the
/// same info hash describe byte-identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Decode` - If the string is not 40 hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, DescriptorError> {
        let bytes = hex::decode(hex_str).map_err(|e| DescriptorError::Decode {
            reason: format!("invalid info hash hex: {e}"),
        })?;
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| DescriptorError::Decode {
                reason: "info hash must be 20 bytes".to_string(),
            })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while building, encoding or decoding descriptors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// Bytes received from a peer are not a valid descriptor
    #[error("Malformed descriptor: {reason}")]
    Decode { reason: String },

    /// Descriptor could not be serialized
    #[error("Descriptor encoding failed: {reason}")]
    Encode { reason: String },

    /// Source content cannot be described (empty, unreadable name, ...)
    #[error("Invalid descriptor source: {reason}")]
    InvalidSource { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Individual file within a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    pub path: Vec<String>,
    pub length: u64,
}

/// Contiguous byte range of one piece that lives inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// Immutable manifest of a distributed artifact.
///
/// `files` always holds at least one entry. Single-file descriptors have one
/// file whose path is `[name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDescriptor {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<DescriptorFile>,
    pub announce_list: Vec<Vec<String>>,
}

impl TorrentDescriptor {
    /// Number of pieces.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// True when the descriptor was built from a directory.
    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1 || self.files.first().is_some_and(|f| f.path.len() > 1)
    }

    /// Primary tracker, the first entry of the first tier.
    pub fn announce(&self) -> Option<&str> {
        self.announce_list
            .first()
            .and_then(|tier| tier.first())
            .map(String::as_str)
    }

    /// Byte offset of a piece within the concatenated content.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        u64::from(index.as_u32()) * u64::from(self.piece_length)
    }

    /// Length of a piece; the last piece may be shorter. Returns `None` when
    /// the index is out of range.
    pub fn piece_size(&self, index: PieceIndex) -> Option<u32> {
        if index.as_u32() >= self.piece_count() {
            return None;
        }
        let offset = self.piece_offset(index);
        let remaining = self.total_length - offset;
        Some(remaining.min(u64::from(self.piece_length)) as u32)
    }

    /// Checks piece bytes against the recorded SHA-1 hash.
    pub fn verify_piece(&self, index: PieceIndex, piece: &[u8]) -> bool {
        let Some(expected) = self.piece_hashes.get(index.as_u32() as usize) else {
            return false;
        };
        if self.piece_size(index) != Some(piece.len() as u32) {
            return false;
        }
        let digest = Sha1::digest(piece);
        digest.as_slice() == expected
    }

    /// Maps a piece onto the files it covers.
    pub fn file_spans(&self, index: PieceIndex) -> Vec<FileSpan> {
        let Some(size) = self.piece_size(index) else {
            return Vec::new();
        };
        let mut spans = Vec::new();
        let mut position = self.piece_offset(index);
        let mut remaining = u64::from(size);
        let mut file_start = 0u64;

        for (file_index, file) in self.files.iter().enumerate() {
            let file_end = file_start + file.length;
            if remaining > 0 && position < file_end && file.length > 0 {
                let file_offset = position - file_start;
                let length = remaining.min(file_end - position);
                spans.push(FileSpan {
                    file_index,
                    file_offset,
                    length,
                });
                position += length;
                remaining -= length;
            }
            file_start = file_end;
        }

        spans
    }
}
