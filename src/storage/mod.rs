//! Storage module
//!
//! Piece reassembly, the download loop and the sinks verified pieces go to.

pub mod backend;
pub mod piece;
pub mod file;
pub mod download;

// Re-export backend types
pub use backend::{MemorySink, PieceSink};

// Re-export piece types
pub use piece::PieceBuffer;

// Re-export file storage types
pub use file::FileAssembler;

// Re-export download types
pub use download::{
    download_file, download_piece, DownloadOptions, DownloadStats, PieceDownloader, PieceStream,
    DEFAULT_MAX_PIECE_RETRIES, DEFAULT_PIPELINE_DEPTH,
};
