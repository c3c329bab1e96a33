//! File storage module
//!
//! Writes verified pieces into the single output file at their offsets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::error::TorrentError;
use crate::storage::backend::PieceSink;
use crate::torrent::TorrentMetainfo;

/// Assembles the downloaded content on disk
#[derive(Debug)]
pub struct FileAssembler {
    /// Output path
    path: PathBuf,
    /// Open handle, held for the whole download
    file: File,
    /// Torrent layout
    metainfo: Arc<TorrentMetainfo>,
    /// Which pieces have been written
    written: Vec<bool>,
}

impl FileAssembler {
    /// Create (or truncate) the output file
    pub async fn create(path: impl AsRef<Path>, metainfo: Arc<TorrentMetainfo>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Creating output file: {} ({} bytes)", path.display(), metainfo.total_length);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                debug!("Creating directory: {}", parent.display());
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!("Failed to create directory '{}': {}", parent.display(), e);
                    TorrentError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
                })?;
            }
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", path.display(), e);
                TorrentError::storage_error_full("Failed to create file", path.display().to_string(), e.to_string())
            })?;

        Ok(Self {
            path,
            file,
            written: vec![false; metainfo.piece_count() as usize],
            metainfo,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a verified piece at `index * piece_length`
    pub async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let expected = self.metainfo.piece_len(index)?;
        if data.len() != expected as usize {
            error!("Piece {} has {} bytes, expected {}", index, data.len(), expected);
            return Err(TorrentError::invariant_violation(format!(
                "piece {} has {} bytes, expected {}",
                index,
                data.len(),
                expected
            ))
            .into());
        }

        let offset = self.metainfo.piece_offset(index);
        debug!("Writing piece {} ({} bytes) at offset {}", index, data.len(), offset);

        self.file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| {
            error!("Failed to seek in file '{}': {}", self.path.display(), e);
            TorrentError::storage_error_full("Failed to seek in file", self.path.display().to_string(), e.to_string())
        })?;
        self.file.write_all(data).await.map_err(|e| {
            error!("Failed to write piece {} to '{}': {}", index, self.path.display(), e);
            TorrentError::storage_error_full(
                format!("Failed to write piece {}", index),
                self.path.display().to_string(),
                e.to_string(),
            )
        })?;

        self.written[index as usize] = true;
        Ok(())
    }

    /// Flush, sync and check the file holds every piece
    pub async fn finish(&mut self) -> Result<()> {
        let written = self.written.iter().filter(|w| **w).count();
        if written != self.written.len() {
            return Err(TorrentError::invariant_violation(format!(
                "output finished with {}/{} pieces written",
                written,
                self.written.len()
            ))
            .into());
        }

        self.file.flush().await.map_err(|e| {
            TorrentError::storage_error_full("Failed to flush file", self.path.display().to_string(), e.to_string())
        })?;
        self.file.sync_all().await.map_err(|e| {
            TorrentError::storage_error_full("Failed to sync file", self.path.display().to_string(), e.to_string())
        })?;

        let len = self
            .file
            .metadata()
            .await
            .map_err(|e| TorrentError::storage_error_full("Failed to stat file", self.path.display().to_string(), e.to_string()))?
            .len();
        if len != self.metainfo.total_length {
            return Err(TorrentError::storage_error_with_path(
                format!("output has {} bytes, expected {}", len, self.metainfo.total_length),
                self.path.display().to_string(),
            )
            .into());
        }

        info!("Output complete: {} ({} bytes)", self.path.display(), len);
        Ok(())
    }
}

#[async_trait]
impl PieceSink for FileAssembler {
    async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<()> {
        FileAssembler::write_piece(self, index, data).await
    }

    async fn finish(&mut self) -> Result<()> {
        FileAssembler::finish(self).await
    }

    fn pieces_written(&self) -> u32 {
        self.written.iter().filter(|w| **w).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metainfo() -> Arc<TorrentMetainfo> {
        Arc::new(TorrentMetainfo {
            announce: "http://tracker.test/announce".to_string(),
            name: "out.bin".to_string(),
            piece_length: 400,
            total_length: 1000,
            piece_hashes: vec![[0u8; 20]; 3],
            info_hash: [0u8; 20],
        })
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mini-bittorrent-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_write_pieces_out_of_order() {
        let path = temp_path("assemble.bin");
        let mut assembler = FileAssembler::create(&path, metainfo()).await.unwrap();

        assembler.write_piece(2, &[3u8; 200]).await.unwrap();
        assembler.write_piece(0, &[1u8; 400]).await.unwrap();
        assembler.write_piece(1, &[2u8; 400]).await.unwrap();
        assembler.finish().await.unwrap();
        drop(assembler);

        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(data.len(), 1000);
        assert!(data[..400].iter().all(|b| *b == 1));
        assert!(data[400..800].iter().all(|b| *b == 2));
        assert!(data[800..].iter().all(|b| *b == 3));
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_piece_length_mismatch() {
        let path = temp_path("mismatch.bin");
        let mut assembler = FileAssembler::create(&path, metainfo()).await.unwrap();

        let err = assembler.write_piece(2, &[0u8; 400]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::InvariantViolation { .. })));
        assert!(assembler.write_piece(3, &[0u8; 1]).await.is_err());
        assert_eq!(PieceSink::pieces_written(&assembler), 0);

        drop(assembler);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_finish_requires_every_piece() {
        let path = temp_path("partial.bin");
        let mut assembler = FileAssembler::create(&path, metainfo()).await.unwrap();
        assembler.write_piece(0, &[1u8; 400]).await.unwrap();

        assert!(assembler.finish().await.is_err());
        drop(assembler);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_truncates_existing_file() {
        let path = temp_path("truncate.bin");
        tokio::fs::write(&path, vec![9u8; 5000]).await.unwrap();

        let assembler = FileAssembler::create(&path, metainfo()).await.unwrap();
        drop(assembler);

        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
