//! BitTorrent protocol module
//!
//! Implements the peer wire protocol: handshake, message codec and framing.

pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use handshake::{Handshake, HANDSHAKE_LEN, PEER_ID_PREFIX, PROTOCOL_LENGTH, PROTOCOL_STRING};
pub use message::{BlockRequest, Message, MessageId};
pub use wire::{decode_frame, encode_frame, PeerWire, MAX_FRAME_LEN};
