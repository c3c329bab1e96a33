//! Torrent metainfo structures
//!
//! Immutable description of a single-file torrent plus the piece and block
//! arithmetic derived from it.

use sha1::{Digest, Sha1};
use anyhow::Result;

use crate::bencode::BencodeValue;
use crate::error::TorrentError;

/// Size of a wire-level block request (16 KiB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Parsed torrent metainfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetainfo {
    /// Tracker announce URL
    pub announce: String,
    /// Suggested file name
    pub name: String,
    /// Bytes per piece (the last piece may be shorter)
    pub piece_length: u32,
    /// Total content length in bytes
    pub total_length: u64,
    /// SHA-1 digest of every piece, in order
    pub piece_hashes: Vec<[u8; 20]>,
    /// SHA-1 digest of the canonical encoding of the info dictionary
    pub info_hash: [u8; 20],
}

impl TorrentMetainfo {
    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Expected piece count for a length / piece length pair
    pub fn expected_piece_count(total_length: u64, piece_length: u32) -> u64 {
        total_length.div_ceil(u64::from(piece_length))
    }

    /// Actual length of a piece; the final piece holds the remainder
    pub fn piece_len(&self, index: u32) -> Result<u32> {
        let count = self.piece_count();
        if index >= count {
            return Err(TorrentError::invariant_violation(format!(
                "piece index {} out of range ({} pieces)",
                index, count
            ))
            .into());
        }

        if index + 1 < count {
            Ok(self.piece_length)
        } else {
            let preceding = u64::from(self.piece_length) * u64::from(count - 1);
            Ok((self.total_length - preceding) as u32)
        }
    }

    /// Byte offset of a piece within the content
    pub fn piece_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.piece_length)
    }

    /// Expected hash of a piece
    pub fn piece_hash(&self, index: u32) -> Option<[u8; 20]> {
        self.piece_hashes.get(index as usize).copied()
    }

    /// Number of 16 KiB blocks in a piece
    pub fn block_count(&self, index: u32) -> Result<u32> {
        Ok(self.piece_len(index)?.div_ceil(BLOCK_SIZE))
    }

    /// Info hash as lowercase hex
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Hash the canonical encoding of an info dictionary
    pub fn compute_info_hash(info: &BencodeValue) -> [u8; 20] {
        sha1_digest(&info.encode())
    }

    /// Split the concatenated `pieces` blob into 20-byte digests
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::invalid_metainfo_field(
                format!("pieces length must be a multiple of 20, got {}", pieces_bytes.len()),
                "info.pieces",
            )
            .into());
        }

        Ok(pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }
}

/// SHA-1 of a byte slice
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
