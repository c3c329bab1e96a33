//! Peer module
//!
//! Handles the session with a single remote peer.

pub mod connection;
pub mod state;

// Re-export main types
pub use connection::{PeerSession, SessionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use state::{PeerStatus, SessionState};
