//! Tracker announce responses

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use tracing::{debug, warn};

use crate::bencode::{self, BencodeValue};
use crate::error::TorrentError;

/// Size of one compact peer entry (4 bytes IP + 2 bytes port)
pub const COMPACT_PEER_LEN: usize = 6;

/// Decoded tracker response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds the tracker wants between announces
    pub interval: Option<u64>,
    /// Seeders, if reported
    pub complete: Option<u64>,
    /// Leechers, if reported
    pub incomplete: Option<u64>,
    /// Peers in tracker order
    pub peers: Vec<SocketAddr>,
}

impl TrackerResponse {
    /// Parse a bencoded announce response body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let root = bencode::decode_all(body).map_err(|e| {
            TorrentError::tracker_error(format!("invalid tracker response: {}", e))
        })?;
        let dict = root
            .as_dict()
            .ok_or_else(|| TorrentError::tracker_error(format!("response must be a dictionary, got {}", root.kind())))?;

        if let Some(reason) = dict.get(b"failure reason".as_slice()) {
            let reason = reason
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| format!("{:?}", reason));
            warn!("Tracker refused announce: {}", reason);
            return Err(TorrentError::tracker_error(reason).into());
        }

        let count = |key: &[u8]| dict.get(key).and_then(BencodeValue::as_int).and_then(|v| u64::try_from(v).ok());

        let peers = match dict.get(b"peers".as_slice()) {
            Some(BencodeValue::ByteString(blob)) => parse_compact_peers(blob)?,
            Some(BencodeValue::List(entries)) => parse_peer_dicts(entries)?,
            Some(other) => {
                return Err(TorrentError::tracker_error(format!("peers has unexpected type {}", other.kind())).into())
            }
            None => return Err(TorrentError::tracker_error("response has no peers").into()),
        };

        debug!("Tracker returned {} peers", peers.len());
        Ok(Self {
            interval: count(b"interval".as_slice()),
            complete: count(b"complete".as_slice()),
            incomplete: count(b"incomplete".as_slice()),
            peers,
        })
    }
}

/// Decode the compact peer model: 4 bytes IPv4 + 2 bytes port, big-endian
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddr>> {
    if data.len() % COMPACT_PEER_LEN != 0 {
        return Err(TorrentError::tracker_error(format!(
            "compact peers length {} is not a multiple of {}",
            data.len(),
            COMPACT_PEER_LEN
        ))
        .into());
    }

    Ok(data
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(ip.into(), port)
        })
        .collect())
}

/// Decode the dictionary peer model (`ip`, `port` per entry)
fn parse_peer_dicts(entries: &[BencodeValue]) -> Result<Vec<SocketAddr>> {
    entries
        .iter()
        .map(|entry| {
            let ip = entry
                .get(b"ip")
                .and_then(BencodeValue::as_str)
                .and_then(|s| s.parse::<IpAddr>().ok())
                .ok_or_else(|| TorrentError::tracker_error("peer entry has no valid ip"))?;
            let port = entry
                .get(b"port")
                .and_then(BencodeValue::as_int)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| TorrentError::tracker_error("peer entry has no valid port"))?;
            Ok(SocketAddr::new(ip, port))
        })
        .collect()
}
