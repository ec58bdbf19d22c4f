//! Bencoded metainfo encoding and decoding for descriptors

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::{DescriptorError, DescriptorFile, InfoHash, TorrentDescriptor};

#[derive(Debug, Serialize, Deserialize)]
struct Metainfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    announce: Option<String>,
    #[serde(
        rename = "announce-list",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    announce_list: Option<Vec<Vec<String>>>,
    info: InfoDict,
}

#[derive(Debug, Serialize, Deserialize)]
struct InfoDict {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileEntry>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    length: u64,
    path: Vec<String>,
}

/// Computes the info hash of a descriptor's info dictionary.
pub(crate) fn compute_info_hash(
    name: &str,
    piece_length: u32,
    piece_hashes: &[[u8; 20]],
    files: &[DescriptorFile],
) -> Result<InfoHash, DescriptorError> {
    let info = info_dict(name, piece_length, piece_hashes, files);
    hash_info(&info)
}

fn info_dict(
    name: &str,
    piece_length: u32,
    piece_hashes: &[[u8; 20]],
    files: &[DescriptorFile],
) -> InfoDict {
    let single_file = files.len() == 1 && files[0].path.len() == 1;
    InfoDict {
        name: name.to_string(),
        piece_length: u64::from(piece_length),
        pieces: piece_hashes.concat(),
        length: single_file.then(|| files[0].length),
        files: (!single_file).then(|| {
            files
                .iter()
                .map(|file| FileEntry {
                    length: file.length,
                    // Multi-file paths are stored relative to the top-level name
                    path: file.path.iter().skip(1).cloned().collect(),
                })
                .collect()
        }),
    }
}

/// Rejects path components that could leave the download directory.
fn check_path_component(component: &str) -> Result<(), DescriptorError> {
    let unsafe_component = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0'])
        || std::path::Path::new(component).is_absolute();
    if unsafe_component {
        return Err(DescriptorError::Decode {
            reason: format!("unsafe path component {component:?}"),
        });
    }
    Ok(())
}

fn hash_info(info: &InfoDict) -> Result<InfoHash, DescriptorError> {
    let info_bytes = serde_bencode::to_bytes(info).map_err(|e| DescriptorError::Encode {
        reason: e.to_string(),
    })?;
    let digest = Sha1::digest(&info_bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    Ok(InfoHash::new(hash))
}

impl TorrentDescriptor {
    /// Serializes the descriptor as bencoded metainfo.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Encode` - If bencode serialization failed
    pub fn to_bytes(&self) -> Result<Vec<u8>, DescriptorError> {
        let announce_list = (!self.announce_list.is_empty()).then(|| self.announce_list.clone());
        let metainfo = Metainfo {
            announce: self.announce().map(str::to_string),
            announce_list,
            info: info_dict(
                &self.name,
                self.piece_length,
                &self.piece_hashes,
                &self.files,
            ),
        };

        serde_bencode::to_bytes(&metainfo).map_err(|e| DescriptorError::Encode {
            reason: e.to_string(),
        })
    }

    /// Decodes bencoded metainfo received from a peer.
    ///
    /// # Errors
    ///
    /// - `DescriptorError::Decode` - Malformed bencode, missing fields or
    ///   inconsistent piece layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let metainfo: Metainfo =
            serde_bencode::from_bytes(bytes).map_err(|e| DescriptorError::Decode {
                reason: format!("bencode parsing failed: {e}"),
            })?;
        let info = metainfo.info;

        if info.piece_length == 0 || info.piece_length > u64::from(u32::MAX) {
            return Err(DescriptorError::Decode {
                reason: format!("invalid piece length {}", info.piece_length),
            });
        }
        if info.pieces.len() % 20 != 0 {
            return Err(DescriptorError::Decode {
                reason: "pieces length is not a multiple of 20".to_string(),
            });
        }

        check_path_component(&info.name)?;
        for entry in info.files.iter().flatten() {
            if entry.path.is_empty() {
                return Err(DescriptorError::Decode {
                    reason: "file entry has an empty path".to_string(),
                });
            }
            entry
                .path
                .iter()
                .try_for_each(|component| check_path_component(component))?;
        }

        let files = match (info.length, &info.files) {
            (Some(length), None) => vec![DescriptorFile {
                path: vec![info.name.clone()],
                length,
            }],
            (None, Some(entries)) if !entries.is_empty() => entries
                .iter()
                .map(|entry| DescriptorFile {
                    path: std::iter::once(info.name.clone())
                        .chain(entry.path.iter().cloned())
                        .collect(),
                    length: entry.length,
                })
                .collect(),
            _ => {
                return Err(DescriptorError::Decode {
                    reason: "info must have exactly one of 'length' or 'files'".to_string(),
                });
            }
        };

        let total_length = files
            .iter()
            .try_fold(0u64, |total, file| total.checked_add(file.length))
            .ok_or_else(|| DescriptorError::Decode {
                reason: "total length overflows".to_string(),
            })?;
        let piece_hashes: Vec<[u8; 20]> = info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let expected_pieces = total_length.div_ceil(info.piece_length);
        if piece_hashes.len() as u64 != expected_pieces {
            return Err(DescriptorError::Decode {
                reason: format!(
                    "expected {expected_pieces} piece hashes for {total_length} bytes, found {}",
                    piece_hashes.len()
                ),
            });
        }

        let info_hash = hash_info(&info)?;
        let announce_list = match (metainfo.announce_list, metainfo.announce) {
            (Some(tiers), _) if !tiers.is_empty() => tiers,
            (_, Some(announce)) => vec![vec![announce]],
            _ => Vec::new(),
        };

        Ok(Self {
            info_hash,
            name: info.name,
            piece_length: info.piece_length as u32,
            piece_hashes,
            total_length,
            files,
            announce_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor(files: Vec<DescriptorFile>) -> TorrentDescriptor {
        let total_length: u64 = files.iter().map(|f| f.length).sum();
        let piece_hashes = vec![[3u8; 20]; total_length.div_ceil(64) as usize];
        let info_hash = compute_info_hash("weights", 64, &piece_hashes, &files).unwrap();
        TorrentDescriptor {
            info_hash,
            name: "weights".to_string(),
            piece_length: 64,
            piece_hashes,
            total_length,
            files,
            announce_list: vec![
                vec!["udp://tracker.one:1337/announce".to_string()],
                vec!["udp://tracker.two:6969/announce".to_string()],
            ],
        }
    }

    #[test]
    fn test_single_file_descriptor_survives_encoding() {
        let descriptor = sample_descriptor(vec![DescriptorFile {
            path: vec!["weights".to_string()],
            length: 200,
        }]);

        let bytes = descriptor.to_bytes().unwrap();
        let decoded = TorrentDescriptor::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.announce(), Some("udp://tracker.one:1337/announce"));
    }

    #[test]
    fn test_multi_file_paths_are_relative_on_the_wire() {
        let descriptor = sample_descriptor(vec![
            DescriptorFile {
                path: vec!["weights".to_string(), "a.bin".to_string()],
                length: 100,
            },
            DescriptorFile {
                path: vec!["weights".to_string(), "nested".to_string(), "b.bin".to_string()],
                length: 30,
            },
        ]);

        let bytes = descriptor.to_bytes().unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("5:filesl"));
        assert!(!raw.contains("6:lengthi130e"));

        let decoded = TorrentDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.files, descriptor.files);
        assert_eq!(decoded.info_hash, descriptor.info_hash);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let descriptor = sample_descriptor(vec![DescriptorFile {
            path: vec!["weights".to_string()],
            length: 10,
        }]);
        assert_eq!(descriptor.to_bytes().unwrap(), descriptor.to_bytes().unwrap());
    }

    #[test]
    fn test_garbage_is_rejected_as_decode_error() {
        let result = TorrentDescriptor::from_bytes(b"not bencode at all");
        assert!(matches!(result, Err(DescriptorError::Decode { .. })));
    }

    fn raw_multi_file(name: &str, files: &[(&[&str], u64)]) -> Vec<u8> {
        let metainfo = Metainfo {
            announce: None,
            announce_list: None,
            info: InfoDict {
                name: name.to_string(),
                piece_length: 64,
                pieces: vec![7u8; 20],
                length: None,
                files: Some(
                    files
                        .iter()
                        .map(|(path, length)| FileEntry {
                            length: *length,
                            path: path.iter().map(|c| c.to_string()).collect(),
                        })
                        .collect(),
                ),
            },
        };
        serde_bencode::to_bytes(&metainfo).unwrap()
    }

    #[test]
    fn test_paths_escaping_the_download_directory_are_rejected() {
        let cases: [(&str, &[&str]); 7] = [
            ("ckpt", &["..", "..", "escaped.bin"]),
            ("ckpt", &[".", "a.bin"]),
            ("ckpt", &["nested/a.bin"]),
            ("ckpt", &["nested\\a.bin"]),
            ("ckpt", &["/etc", "passwd"]),
            ("ckpt", &[""]),
            ("..", &["a.bin"]),
        ];
        for (name, path) in cases {
            let bytes = raw_multi_file(name, &[(path, 10)]);
            let result = TorrentDescriptor::from_bytes(&bytes);
            assert!(
                matches!(result, Err(DescriptorError::Decode { .. })),
                "{name:?} {path:?} was accepted"
            );
        }

        let empty_path = raw_multi_file("ckpt", &[(&[], 10)]);
        assert!(TorrentDescriptor::from_bytes(&empty_path).is_err());

        let fine = raw_multi_file("ckpt", &[(&["nested", "a.bin"], 10)]);
        assert!(TorrentDescriptor::from_bytes(&fine).is_ok());
    }

    #[test]
    fn test_overflowing_total_length_is_rejected() {
        let big = i64::MAX as u64;
        let bytes = raw_multi_file("ckpt", &[(&["a"], big), (&["b"], big), (&["c"], 2)]);
        let result = TorrentDescriptor::from_bytes(&bytes);
        assert!(matches!(result, Err(DescriptorError::Decode { .. })));
    }

    #[test]
    fn test_piece_count_mismatch_is_rejected() {
        let mut descriptor = sample_descriptor(vec![DescriptorFile {
            path: vec!["weights".to_string()],
            length: 200,
        }]);
        descriptor.piece_hashes.pop();

        let bytes = descriptor.to_bytes().unwrap();
        let result = TorrentDescriptor::from_bytes(&bytes);
        assert!(matches!(result, Err(DescriptorError::Decode { .. })));
    }
}
