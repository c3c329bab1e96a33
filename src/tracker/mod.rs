//! Tracker module
//!
//! Peer discovery through the torrent's HTTP tracker.

pub mod response;

#[cfg(feature = "download")]
pub mod http;

pub use response::{parse_compact_peers, TrackerResponse, COMPACT_PEER_LEN};

#[cfg(feature = "download")]
pub use http::TrackerClient;
