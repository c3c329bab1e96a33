//! Torrent metainfo module
//!
//! Extracts the structural fields of a `.torrent` file from its decoded
//! bencode tree and derives the info hash.

pub mod info;
pub mod parser;

pub use info::{TorrentMetainfo, BLOCK_SIZE};
pub use parser::TorrentParser;
