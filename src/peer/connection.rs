//! Peer connection module
//!
//! A single session with one remote peer: handshake, the choke/interest
//! negotiation and message exchange, each socket operation under a deadline.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::state::{PeerStatus, SessionState};
use crate::protocol::{BlockRequest, Handshake, Message, PeerWire, MAX_FRAME_LEN};

/// Default TCP connect deadline
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for a single read or write
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings a session needs from the outside world
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Our peer ID, sent in the handshake
    pub peer_id: [u8; 20],
    /// Deadline for the TCP connect
    pub connect_timeout: Duration,
    /// Deadline for each socket read or write
    pub io_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer_id: Handshake::generate_peer_id(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// A session with one peer
pub struct PeerSession<S = TcpStream> {
    /// What we know about the peer
    status: PeerStatus,
    /// Framed transport
    wire: PeerWire<S>,
    /// Torrent the session is for
    info_hash: [u8; 20],
    config: SessionConfig,
}

impl PeerSession<TcpStream> {
    /// Connect to a peer at the given address and perform the handshake
    pub async fn connect(addr: SocketAddr, info_hash: [u8; 20], config: SessionConfig) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let socket = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                error!("Failed to connect to {}: {}", addr, e);
                return Err(TorrentError::transfer_error_full("Failed to connect", addr.to_string(), e.to_string()).into());
            }
            Err(_) => {
                warn!("Connection timeout to {}", addr);
                return Err(TorrentError::transfer_error_full(
                    "Connection timeout",
                    addr.to_string(),
                    format!("no answer within {:?}", config.connect_timeout),
                )
                .into());
            }
        };

        debug!("Connected to peer: {}", addr);
        let mut session = Self::from_stream(socket, addr, info_hash, config);
        session.handshake().await?;

        info!("Successfully connected and handshaked with peer: {}", addr);
        Ok(session)
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream; no bytes are exchanged yet
    pub fn from_stream(stream: S, addr: SocketAddr, info_hash: [u8; 20], config: SessionConfig) -> Self {
        trace!("Creating peer session for {}", addr);
        Self {
            status: PeerStatus::new(addr),
            wire: PeerWire::new(stream),
            info_hash,
            config,
        }
    }

    /// Perform the BitTorrent handshake and return the remote peer ID
    pub async fn handshake(&mut self) -> Result<[u8; 20]> {
        match self.perform_handshake().await {
            Ok(peer_id) => Ok(peer_id),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn perform_handshake(&mut self) -> Result<[u8; 20]> {
        let addr = self.status.addr;
        info!("Performing handshake with peer: {}", addr);

        let ours = Handshake::new(self.info_hash, self.config.peer_id);
        self.transition(SessionState::HandshakeSent)?;
        with_deadline(self.config.io_timeout, "sending handshake", self.wire.write_handshake(&ours)).await?;

        debug!("Reading handshake from peer: {}", addr);
        let theirs = with_deadline(self.config.io_timeout, "reading handshake", self.wire.read_handshake()).await?;
        theirs.validate(&self.info_hash)?;

        self.status.peer_id = Some(theirs.peer_id);
        self.transition(SessionState::HandshakeVerified)?;
        debug!("Handshake completed with peer {} ({})", addr, hex::encode(theirs.peer_id));
        Ok(theirs.peer_id)
    }

    /// Take the session from a verified handshake to an unchoked state.
    ///
    /// Reads the first message whatever it is, sends `interested`, then
    /// discards messages until the peer unchokes us.
    pub async fn prepare_download(&mut self) -> Result<()> {
        match self.negotiate_unchoke().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn negotiate_unchoke(&mut self) -> Result<()> {
        self.transition(SessionState::AwaitingFirstMessage)?;
        let first = self.receive_message().await?;
        debug!("First message from {}: {:?}", self.status.addr, first.message_id());

        self.send_interested().await?;
        self.transition(SessionState::InterestSent)?;
        self.transition(SessionState::AwaitingUnchoke)?;

        while self.status.peer_choking {
            let message = self.receive_message().await?;
            if message != Message::Unchoke {
                trace!("Discarding {:?} while waiting for unchoke", message.message_id());
            }
        }
        if self.status.state == SessionState::AwaitingUnchoke {
            self.transition(SessionState::Unchoked)?;
        }

        info!("Peer {} unchoked us", self.status.addr);
        Ok(())
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        self.ensure_established("send message")?;

        trace!("Sending {:?} message to peer: {}", message.message_id(), self.status.addr);
        match with_deadline(self.config.io_timeout, "writing message", self.wire.write_message(message)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Receive the next message and apply its effect on the peer flags
    pub async fn receive_message(&mut self) -> Result<Message> {
        self.ensure_established("receive message")?;

        let message = match with_deadline(self.config.io_timeout, "reading message", self.wire.read_message()).await {
            Ok(message) => message,
            Err(e) => return Err(self.fail(e)),
        };

        trace!("Received {:?} message from peer: {}", message.message_id(), self.status.addr);
        self.apply(&message);
        Ok(message)
    }

    /// Request a block from the peer
    pub async fn request_block(&mut self, request: BlockRequest) -> Result<()> {
        if !self.status.can_request() {
            warn!("Cannot request block from peer {}: peer is not ready", self.status.addr);
            return Err(TorrentError::invariant_violation(format!(
                "block requested from {} in state {} (choking: {})",
                self.status.addr, self.status.state, self.status.peer_choking
            ))
            .into());
        }

        debug!(
            "Requesting piece {} block {} ({} bytes) from peer: {}",
            request.index, request.begin, request.length, self.status.addr
        );
        self.send_message(&Message::Request(request)).await
    }

    /// Send interested message to the peer
    pub async fn send_interested(&mut self) -> Result<()> {
        debug!("Sending Interested to peer: {}", self.status.addr);
        self.send_message(&Message::Interested).await?;
        self.status.am_interested = true;
        Ok(())
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        if self.status.state.is_terminal() {
            return Ok(());
        }

        info!("Closing connection to peer: {}", self.status.addr);
        if let Err(e) = self.wire.shutdown().await {
            debug!("Shutdown of {} reported: {}", self.status.addr, e);
        }
        self.status.state = SessionState::Closed;
        Ok(())
    }

    /// Record a completed piece against this peer
    pub fn record_piece(&mut self) {
        self.status.increment_downloaded();
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.status.addr
    }

    /// Get the remote peer ID once the handshake is verified
    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.status.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.status.state
    }

    pub fn status(&self) -> &PeerStatus {
        &self.status
    }

    /// Check if the peer is choking us
    pub fn peer_choking(&self) -> bool {
        self.status.peer_choking
    }

    /// Check if we are interested in the peer
    pub fn am_interested(&self) -> bool {
        self.status.am_interested
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    fn apply(&mut self, message: &Message) {
        match message {
            Message::Choke => {
                self.status.peer_choking = true;
                if self.status.state == SessionState::Unchoked {
                    self.status.state = SessionState::AwaitingUnchoke;
                }
                info!("Peer {} choked us", self.status.addr);
            }
            Message::Unchoke => {
                self.status.peer_choking = false;
                if self.status.state == SessionState::AwaitingUnchoke {
                    self.status.state = SessionState::Unchoked;
                }
                debug!("Peer {} unchoked us", self.status.addr);
            }
            Message::Bitfield { bitfield } => {
                debug!("Peer {} sent bitfield ({} bytes)", self.status.addr, bitfield.len());
                self.status.bitfield = Some(bitfield.to_vec());
            }
            Message::Have { piece_index } => {
                let byte_index = (*piece_index / 8) as usize;
                // no bitfield frame could have announced a piece this far out
                if byte_index >= MAX_FRAME_LEN {
                    debug!("Ignoring have for out-of-range piece {} from {}", piece_index, self.status.addr);
                    return;
                }
                let bitfield = self.status.bitfield.get_or_insert_with(Vec::new);
                if bitfield.len() <= byte_index {
                    bitfield.resize(byte_index + 1, 0);
                }
                bitfield[byte_index] |= 0x80 >> (piece_index % 8);
            }
            Message::KeepAlive => trace!("KeepAlive from {}", self.status.addr),
            _ => {}
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        let current = self.status.state;
        if !current.can_transition_to(next) {
            return Err(TorrentError::invariant_violation(format!(
                "invalid session transition {} -> {}",
                current, next
            ))
            .into());
        }
        debug!("Peer {} state {} -> {}", self.status.addr, current, next);
        self.status.state = next;
        Ok(())
    }

    fn ensure_established(&self, operation: &str) -> Result<()> {
        if !self.status.state.is_established() {
            error!("Attempted to {} in state {} with peer: {}", operation, self.status.state, self.status.addr);
            return Err(TorrentError::invariant_violation(format!(
                "cannot {}: session with {} is {}",
                operation, self.status.addr, self.status.state
            ))
            .into());
        }
        Ok(())
    }

    /// Mark the session failed and tag session errors with the peer address
    fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        if !self.status.state.is_terminal() {
            warn!("Session with {} failed in state {}: {}", self.status.addr, self.status.state, err);
            self.status.state = SessionState::Failed;
        }
        match err.downcast::<TorrentError>() {
            Ok(e) => e.with_peer(self.status.addr.to_string()).into(),
            Err(other) => other,
        }
    }
}

async fn with_deadline<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Timed out after {:?} while {}", limit, operation);
            Err(TorrentError::transfer_error_with_source("Operation timed out", format!("{} after {:?}", operation, limit)).into())
        }
    }
}
