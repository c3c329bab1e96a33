//! Piece storage module
//!
//! Reassembly buffer for one piece: blocks may arrive in any order and the
//! piece is only released once every byte is present and the hash matches.

use anyhow::Result;
use tracing::{debug, trace, warn};

use crate::error::TorrentError;
use crate::protocol::BlockRequest;
use crate::torrent::info::sha1_digest;
use crate::torrent::{TorrentMetainfo, BLOCK_SIZE};

/// Buffer for a piece being downloaded
#[derive(Debug, Clone)]
pub struct PieceBuffer {
    /// Piece index
    index: u32,
    /// Expected SHA1 hash
    hash: [u8; 20],
    /// Piece bytes, sized to the piece's actual length
    data: Vec<u8>,
    /// Which blocks have been written
    filled: Vec<bool>,
    /// Number of `true` entries in `filled`
    filled_count: usize,
}

impl PieceBuffer {
    /// Create a new, empty piece buffer
    pub fn new(index: u32, length: u32, expected_hash: [u8; 20]) -> Self {
        let block_count = length.div_ceil(BLOCK_SIZE) as usize;
        Self {
            index,
            hash: expected_hash,
            data: vec![0u8; length as usize],
            filled: vec![false; block_count],
            filled_count: 0,
        }
    }

    /// Create the buffer for piece `index` of a torrent
    pub fn for_piece(metainfo: &TorrentMetainfo, index: u32) -> Result<Self> {
        let length = metainfo.piece_len(index)?;
        let hash = metainfo
            .piece_hash(index)
            .ok_or_else(|| TorrentError::invariant_violation(format!("no hash for piece {}", index)))?;
        Ok(Self::new(index, length, hash))
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Length of the piece in bytes
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of blocks
    pub fn block_count(&self) -> u32 {
        self.filled.len() as u32
    }

    /// Get the number of received blocks
    pub fn filled_blocks(&self) -> u32 {
        self.filled_count as u32
    }

    /// Request for block `block` of this piece; the final block is short
    pub fn block_request(&self, block: u32) -> BlockRequest {
        let begin = block * BLOCK_SIZE;
        let length = (self.len() - begin).min(BLOCK_SIZE);
        BlockRequest::new(self.index, begin, length)
    }

    /// Requests for every block in ascending offset order
    pub fn block_requests(&self) -> Vec<BlockRequest> {
        (0..self.block_count()).map(|block| self.block_request(block)).collect()
    }

    /// Requests for blocks that have not been received yet
    pub fn missing_blocks(&self) -> Vec<BlockRequest> {
        self.filled
            .iter()
            .enumerate()
            .filter(|(_, filled)| !**filled)
            .map(|(block, _)| self.block_request(block as u32))
            .collect()
    }

    /// Copy a received block into place.
    ///
    /// Returns `Ok(false)` for a block that was already filled. A block at an
    /// unexpected offset or with the wrong length is a transfer error.
    pub fn fill(&mut self, begin: u32, block: &[u8]) -> Result<bool> {
        if begin % BLOCK_SIZE != 0 || begin >= self.len() {
            warn!("Block offset {} does not fit piece {} ({} bytes)", begin, self.index, self.len());
            return Err(TorrentError::transfer_error_with_source(
                format!("Block offset {} out of range for piece {}", begin, self.index),
                format!("piece length {}", self.len()),
            )
            .into());
        }

        let expected = self.block_request(begin / BLOCK_SIZE);
        if block.len() != expected.length as usize {
            warn!(
                "Block {} of piece {} has {} bytes, expected {}",
                begin,
                self.index,
                block.len(),
                expected.length
            );
            return Err(TorrentError::transfer_error_with_source(
                format!("Block length mismatch in piece {} at offset {}", self.index, begin),
                format!("expected {} bytes, got {}", expected.length, block.len()),
            )
            .into());
        }

        let slot = (begin / BLOCK_SIZE) as usize;
        if self.filled[slot] {
            debug!("Ignoring duplicate block {} of piece {}", begin, self.index);
            return Ok(false);
        }

        let start = begin as usize;
        self.data[start..start + block.len()].copy_from_slice(block);
        self.filled[slot] = true;
        self.filled_count += 1;
        trace!(
            "Piece {}: block {} filled ({}/{})",
            self.index,
            begin,
            self.filled_count,
            self.filled.len()
        );
        Ok(true)
    }

    /// Check if every byte of the piece has been received
    pub fn is_complete(&self) -> bool {
        self.filled_count == self.filled.len()
    }

    /// Verify the hash and release the piece bytes
    pub fn verify(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(TorrentError::invariant_violation(format!(
                "piece {} verified with {}/{} blocks",
                self.index, self.filled_count, self.filled.len()
            ))
            .into());
        }

        let actual = sha1_digest(&self.data);
        if actual != self.hash {
            warn!("Piece {} failed hash verification", self.index);
            return Err(TorrentError::hash_mismatch(self.index, self.hash, actual).into());
        }

        debug!("Piece {} verified", self.index);
        Ok(self.data)
    }

    /// Drop all received blocks so the piece can be fetched again
    pub fn reset(&mut self) {
        self.filled.iter_mut().for_each(|f| *f = false);
        self.filled_count = 0;
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}
