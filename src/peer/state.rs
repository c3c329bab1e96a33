//! Peer state module
//!
//! Session lifecycle states and the choke/interest flags tracked per peer.

use std::fmt;
use std::net::SocketAddr;

/// Lifecycle of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Opening the TCP connection
    #[default]
    Connecting,
    /// Our handshake is on the wire
    HandshakeSent,
    /// Remote handshake received and the info hash matched
    HandshakeVerified,
    /// Waiting for the first post-handshake message (usually bitfield)
    AwaitingFirstMessage,
    /// `interested` has been sent
    InterestSent,
    /// Waiting for the peer to unchoke us
    AwaitingUnchoke,
    /// Block requests may be issued
    Unchoked,
    /// Session shut down cleanly
    Closed,
    /// Session abandoned after an error
    Failed,
}

impl SessionState {
    /// Check if the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Check if the handshake has completed
    pub fn is_established(&self) -> bool {
        !matches!(
            self,
            SessionState::Connecting | SessionState::HandshakeSent | SessionState::Closed | SessionState::Failed
        )
    }

    /// Whether moving to `next` follows the session lifecycle
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        if next == Closed {
            return *self != Failed;
        }
        matches!(
            (*self, next),
            (Connecting, HandshakeSent)
                | (HandshakeSent, HandshakeVerified)
                | (HandshakeVerified, AwaitingFirstMessage)
                | (AwaitingFirstMessage, InterestSent)
                | (InterestSent, AwaitingUnchoke)
                | (AwaitingUnchoke, Unchoked)
                // a choke mid-transfer sends us back to waiting
                | (Unchoked, AwaitingUnchoke)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What we know about the remote peer
#[derive(Debug, Clone)]
pub struct PeerStatus {
    /// Peer address
    pub addr: SocketAddr,
    /// Remote peer ID, set once the handshake is verified
    pub peer_id: Option<[u8; 20]>,
    /// Current session state
    pub state: SessionState,
    /// They're choking us
    pub peer_choking: bool,
    /// We're interested
    pub am_interested: bool,
    /// Pieces they advertised (bitfield), if any
    pub bitfield: Option<Vec<u8>>,
    /// Pieces fully downloaded from this peer
    pub pieces_downloaded: u32,
}

impl PeerStatus {
    /// Create the status for a fresh connection attempt
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
            state: SessionState::Connecting,
            peer_choking: true,
            am_interested: false,
            bitfield: None,
            pieces_downloaded: 0,
        }
    }

    /// Check if the handshake has been verified
    pub fn handshake_verified(&self) -> bool {
        self.peer_id.is_some()
    }

    /// Check if we can request blocks from the peer
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.am_interested && self.state == SessionState::Unchoked
    }

    /// Check if the peer advertised a piece.
    ///
    /// Returns `None` when no bitfield was received.
    pub fn has_piece(&self, piece_index: u32) -> Option<bool> {
        let bitfield = self.bitfield.as_ref()?;
        let byte_index = (piece_index / 8) as usize;
        let bit_index = 7 - (piece_index % 8);
        Some(
            bitfield
                .get(byte_index)
                .map(|byte| (byte >> bit_index) & 1 == 1)
                .unwrap_or(false),
        )
    }

    /// Get the peer ID as a hex string
    pub fn peer_id_hex(&self) -> Option<String> {
        self.peer_id.map(hex::encode)
    }

    /// Increment pieces downloaded
    pub fn increment_downloaded(&mut self) {
        self.pieces_downloaded = self.pieces_downloaded.saturating_add(1);
    }
}
