//! Bencode codec
//!
//! Decodes the binary serialization used by torrent files and tracker
//! responses, and re-encodes values canonically (dictionary keys sorted by
//! raw bytes) so that info hashes are reproducible.

pub mod decode;
pub mod encode;
pub mod value;

// Re-export main types
pub use decode::{decode, decode_all, MAX_DEPTH};
pub use encode::{encode, encode_into};
pub use value::{BencodeDict, BencodeValue};
