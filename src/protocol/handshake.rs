//! BitTorrent handshake protocol
//!
//! The fixed 68-byte exchange that opens every peer connection.

use bytes::{BufMut, BytesMut};
use anyhow::Result;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total handshake length on the wire
pub const HANDSHAKE_LEN: usize = 68;

/// Client prefix used for generated peer ids
pub const PEER_ID_PREFIX: &[u8; 8] = b"-MB0001-";

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Reserved extension bytes (all zero for this client)
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        debug!("Creating new handshake for info_hash: {}", hex::encode(info_hash));
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Generate a random peer ID with the client prefix
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
        info!("Generated new peer ID: {}", hex::encode(peer_id));
        peer_id
    }

    /// Serialize the handshake to its 68-byte wire form
    pub fn serialize(&self) -> BytesMut {
        trace!("Serializing handshake");
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf
    }

    /// Deserialize a handshake from exactly 68 bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        trace!("Deserializing handshake from {} bytes", data.len());

        if data.len() != HANDSHAKE_LEN {
            error!("Handshake has wrong length: expected {} bytes, got {}", HANDSHAKE_LEN, data.len());
            return Err(TorrentError::handshake_failed(format!(
                "expected {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            ))
            .into());
        }

        if data[0] != PROTOCOL_LENGTH || &data[1..20] != PROTOCOL_STRING {
            error!("Invalid protocol header in handshake");
            return Err(TorrentError::handshake_failed(format!(
                "invalid protocol header: {:?}",
                String::from_utf8_lossy(&data[1..20])
            ))
            .into());
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        debug!(
            "Handshake info_hash: {}, peer_id: {}",
            hex::encode(info_hash),
            hex::encode(peer_id)
        );
        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check that the handshake is for the expected torrent
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> Result<()> {
        if self.info_hash != *expected_info_hash {
            warn!("Handshake validation failed: info hash mismatch");
            warn!("  Expected: {}", hex::encode(expected_info_hash));
            warn!("  Got:      {}", hex::encode(self.info_hash));
            return Err(TorrentError::handshake_failed(format!(
                "info hash mismatch: expected {}, got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash)
            ))
            .into());
        }

        debug!("Handshake validation successful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let handshake = Handshake::new([1u8; 20], *b"00112233445566778899");
        let bytes = handshake.serialize();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], 0x13);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], b"00112233445566778899");
    }

    #[test]
    fn test_deserialize_reads_remote_peer_id() {
        let sent = Handshake::new([4u8; 20], [9u8; 20]);
        let received = Handshake::deserialize(&sent.serialize()).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_deserialize_rejects_bad_protocol() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        bytes[5] = b'X';
        let err = Handshake::deserialize(&bytes).unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::HandshakeFailed { .. })));
    }

    #[test]
    fn test_deserialize_rejects_short_input() {
        let bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        assert!(Handshake::deserialize(&bytes[..67]).is_err());
    }

    #[test]
    fn test_generate_peer_id() {
        let peer_id = Handshake::generate_peer_id();
        assert_eq!(&peer_id[..8], PEER_ID_PREFIX);
        assert_ne!(Handshake::generate_peer_id(), peer_id);
    }

    #[test]
    fn test_handshake_validate() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(handshake.validate(&[1u8; 20]).is_ok());

        let err = handshake.validate(&[3u8; 20]).unwrap_err();
        assert!(err.to_string().contains("info hash mismatch"));
    }
}
