//! File-share announcement and chunk frames.
//!
//! A share is announced once with a [`FileOffer`] and then streamed as
//! base64 [`FileChunk`]s. Receivers verify size and SHA-256 after the last
//! chunk arrives.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ProtocolError;
use crate::ids::{FileId, ParticipantId};

/// Metadata announced before a file's chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOffer {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub sender: String,
    pub author: ParticipantId,
    pub timestamp: DateTime<Utc>,
    pub chunk_count: u32,
    /// Lowercase hex SHA-256 of the full contents.
    pub sha256: String,
}

/// One slice of a shared file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub file_id: FileId,
    pub index: u32,
    /// Base64 (standard alphabet, padded).
    pub data: String,
}

impl FileChunk {
    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| ProtocolError::InvalidMessage(format!("chunk {}: {e}", self.index)))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Number of chunks needed for `len` bytes. An empty file still sends one
/// (empty) chunk so receivers see completion.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    let size = chunk_size.max(1);
    let count = len.div_ceil(size).max(1);
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Split `bytes` into encoded chunks for `file_id`.
pub fn split_chunks(file_id: &FileId, bytes: &[u8], chunk_size: usize) -> Vec<FileChunk> {
    let size = chunk_size.max(1);
    if bytes.is_empty() {
        return vec![FileChunk {
            file_id: file_id.clone(),
            index: 0,
            data: String::new(),
        }];
    }
    bytes
        .chunks(size)
        .zip(0u32..)
        .map(|(slice, index)| FileChunk {
            file_id: file_id.clone(),
            index,
            data: STANDARD.encode(slice),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 4), 1);
        assert_eq!(chunk_count(4, 4), 1);
        assert_eq!(chunk_count(5, 4), 2);
        assert_eq!(chunk_count(16, 4), 4);
    }

    #[test]
    fn split_matches_chunk_count() {
        let id = FileId::from_raw("file_1");
        let bytes = vec![7u8; 10];
        let chunks = split_chunks(&id, &bytes, 4);
        assert_eq!(chunks.len() as u32, chunk_count(bytes.len(), 4));
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunks[2].decode().unwrap(), vec![7u8; 2]);
    }

    #[test]
    fn empty_file_sends_single_empty_chunk() {
        let chunks = split_chunks(&FileId::from_raw("file_1"), b"", 4);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].decode().unwrap().is_empty());
    }

    #[test]
    fn bad_base64_is_invalid_message() {
        let chunk = FileChunk {
            file_id: FileId::from_raw("file_1"),
            index: 3,
            data: "not base64!!".into(),
        };
        let err = chunk.decode().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
        assert!(err.to_string().contains("chunk 3"));
    }
}
