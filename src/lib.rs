//! mini-bittorrent
//!
//! A minimal single-peer BitTorrent client: bencode codec, torrent metainfo,
//! the peer wire protocol and a piece-by-piece downloader that verifies and
//! assembles a single file.

pub mod bencode;
pub mod torrent;
pub mod protocol;
pub mod peer;
pub mod storage;
pub mod tracker;
pub mod cli;
pub mod error;

pub use error::TorrentError;

pub use bencode::{BencodeDict, BencodeValue};
pub use torrent::{TorrentMetainfo, TorrentParser, BLOCK_SIZE};
pub use protocol::{BlockRequest, Handshake, Message, MessageId, PeerWire};
pub use peer::{PeerSession, PeerStatus, SessionConfig, SessionState};
pub use storage::{
    download_file, download_piece, DownloadOptions, DownloadStats, FileAssembler, MemorySink, PieceBuffer,
    PieceDownloader, PieceSink, PieceStream,
};
pub use tracker::{parse_compact_peers, TrackerResponse};
#[cfg(feature = "download")]
pub use tracker::TrackerClient;
pub use cli::{CliArgs, Config};
