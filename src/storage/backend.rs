//! Piece sink abstraction
//!
//! The download pipeline hands verified pieces to a [`PieceSink`]. Writes are
//! addressed by piece index, so a sink never depends on arrival order.

use async_trait::async_trait;
use anyhow::Result;
use tracing::debug;

use crate::error::TorrentError;
use crate::torrent::TorrentMetainfo;

/// Destination for verified pieces
#[async_trait]
pub trait PieceSink: Send {
    /// Store a verified piece at its offset in the content.
    ///
    /// `data.len()` must equal the piece's actual length.
    async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<()>;

    /// Flush everything once the last piece has been written
    async fn finish(&mut self) -> Result<()>;

    /// Number of distinct pieces written so far
    fn pieces_written(&self) -> u32;
}

/// Sink that assembles the content in memory
#[derive(Debug, Clone)]
pub struct MemorySink {
    piece_length: u64,
    piece_lens: Vec<u32>,
    content: Vec<u8>,
    written: Vec<bool>,
}

impl MemorySink {
    pub fn new(metainfo: &TorrentMetainfo) -> Result<Self> {
        let piece_lens = (0..metainfo.piece_count())
            .map(|index| metainfo.piece_len(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            piece_length: u64::from(metainfo.piece_length),
            written: vec![false; piece_lens.len()],
            piece_lens,
            content: vec![0u8; metainfo.total_length as usize],
        })
    }

    /// Check whether a piece has been written
    pub fn has_piece(&self, index: u32) -> bool {
        self.written.get(index as usize).copied().unwrap_or(false)
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}

#[async_trait]
impl PieceSink for MemorySink {
    async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let expected = *self.piece_lens.get(index as usize).ok_or_else(|| {
            TorrentError::invariant_violation(format!(
                "piece index {} out of range ({} pieces)",
                index,
                self.piece_lens.len()
            ))
        })?;
        if data.len() != expected as usize {
            return Err(TorrentError::invariant_violation(format!(
                "piece {} has {} bytes, expected {}",
                index,
                data.len(),
                expected
            ))
            .into());
        }

        let start = (u64::from(index) * self.piece_length) as usize;
        self.content[start..start + data.len()].copy_from_slice(data);
        self.written[index as usize] = true;
        debug!("Stored piece {} in memory", index);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn pieces_written(&self) -> u32 {
        self.written.iter().filter(|w| **w).count() as u32
    }
}
