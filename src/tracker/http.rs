//! HTTP tracker client
//!
//! Announces to the torrent's tracker and returns the peers it knows about.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};
use url::Url;

use crate::error::TorrentError;
use crate::torrent::TorrentMetainfo;
use crate::tracker::response::TrackerResponse;

/// HTTP tracker client
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: reqwest::Client,
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    /// Create a client announcing as `peer_id` listening on `port`
    pub fn new(peer_id: [u8; 20], port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TorrentError::tracker_error(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, peer_id, port })
    }

    /// Build the announce URL for a torrent.
    ///
    /// The info hash and peer id are raw bytes and are percent-encoded byte
    /// by byte.
    pub fn announce_url(&self, metainfo: &TorrentMetainfo) -> Result<Url> {
        let mut url = Url::parse(&metainfo.announce).map_err(|e| {
            TorrentError::tracker_error_full("Invalid announce URL", metainfo.announce.clone(), e.to_string())
        })?;

        let params = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            urlencoding::encode_binary(&metainfo.info_hash),
            urlencoding::encode_binary(&self.peer_id),
            self.port,
            metainfo.total_length
        );
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, params),
            _ => params,
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    /// Announce to the tracker and return its response
    pub async fn announce(&self, metainfo: &TorrentMetainfo) -> Result<TrackerResponse> {
        let url = self.announce_url(metainfo)?;
        info!("Announcing to tracker: {}", metainfo.announce);
        debug!("Announce URL: {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            error!("Tracker request failed: {}", e);
            TorrentError::tracker_error_full("Tracker request failed", metainfo.announce.clone(), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Tracker answered with HTTP {}", status);
            return Err(TorrentError::tracker_error_full(
                format!("Tracker answered with HTTP {}", status),
                metainfo.announce.clone(),
                status.to_string(),
            )
            .into());
        }

        let body = response.bytes().await.map_err(|e| {
            TorrentError::tracker_error_full("Failed to read tracker response", metainfo.announce.clone(), e.to_string())
        })?;
        debug!("Tracker response: {} bytes", body.len());

        TrackerResponse::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metainfo(announce: &str) -> TorrentMetainfo {
        TorrentMetainfo {
            announce: announce.to_string(),
            name: "test".to_string(),
            piece_length: 10,
            total_length: 20,
            piece_hashes: vec![[0u8; 20]; 2],
            info_hash: [0xd6, 0x9f, 0x91, 0xe6, 0xb2, 0xae, 0x4c, 0x54, 0x24, 0x68, 0xd1, 0x07, 0x3a, 0x71, 0xd4, 0xea, 0x13, 0x87, 0x9a, 0x7f],
        }
    }

    fn client() -> TrackerClient {
        TrackerClient::new(*b"00112233445566778899", 6881, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_announce_url_parameters() {
        let url = client().announce_url(&metainfo("http://tracker.test/announce")).unwrap();
        let query = url.query().unwrap();

        assert!(query.starts_with("info_hash=%D6%9F%91%E6%B2%AELT%24h%D1%07%3Aq%D4%EA%13%87%9A%7F&"));
        assert!(query.contains("peer_id=00112233445566778899"));
        assert!(query.contains("port=6881"));
        assert!(query.contains("left=20"));
        assert!(query.ends_with("compact=1"));
        assert_eq!(url.path(), "/announce");
    }

    #[test]
    fn test_announce_url_keeps_existing_query() {
        let url = client().announce_url(&metainfo("http://tracker.test/announce?key=abc")).unwrap();
        assert!(url.query().unwrap().starts_with("key=abc&info_hash="));
    }

    #[test]
    fn test_invalid_announce_url() {
        let err = client().announce_url(&metainfo("not a url")).unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::TrackerError { .. })));
    }
}
