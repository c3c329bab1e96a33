//! BitTorrent protocol messages
//!
//! Message kinds exchanged after the handshake and their payload layouts.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use anyhow::Result;
use tracing::{error, trace};

use crate::error::TorrentError;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            _ => {
                error!("Invalid message ID: {}", value);
                Err(TorrentError::transfer_error_with_source("Invalid message ID", format!("value: {}", value)).into())
            }
        }
    }
}

/// A block request as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// Piece index
    pub index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    /// Requested length
    pub length: u32,
}

impl BlockRequest {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self { index, begin, length }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Bytes },
    Request(BlockRequest),
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel(BlockRequest),
    Port { listen_port: u16 },
}

impl Message {
    /// Get the message ID (returns None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request(_) => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel(_) => Some(MessageId::Cancel),
            Message::Port { .. } => Some(MessageId::Port),
        }
    }

    /// Value of the length prefix (id byte plus payload)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request(_) | Message::Cancel(_) => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
            Message::Port { .. } => 3,
        }
    }

    /// Append the framed message (length prefix included) to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        trace!("Encoding message: {:?}", self.message_id());
        buf.reserve(4 + self.length() as usize);
        buf.put_u32(self.length());

        let Some(id) = self.message_id() else {
            return;
        };
        buf.put_u8(id as u8);

        match self {
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request(req) | Message::Cancel(req) => {
                buf.put_u32(req.index);
                buf.put_u32(req.begin);
                buf.put_u32(req.length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Port { listen_port } => buf.put_u16(*listen_port),
            _ => {}
        }
    }

    /// Framed bytes of this message
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse the body of a frame (everything after the length prefix)
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(body.get_u8())?;
        let message = match id {
            MessageId::Choke => {
                expect_payload(id, &body, 0)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect_payload(id, &body, 0)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect_payload(id, &body, 0)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect_payload(id, &body, 0)?;
                Message::NotInterested
            }
            MessageId::Have => {
                expect_payload(id, &body, 4)?;
                Message::Have { piece_index: body.get_u32() }
            }
            MessageId::Bitfield => Message::Bitfield { bitfield: body },
            MessageId::Request | MessageId::Cancel => {
                expect_payload(id, &body, 12)?;
                let req = BlockRequest::new(body.get_u32(), body.get_u32(), body.get_u32());
                if id == MessageId::Request {
                    Message::Request(req)
                } else {
                    Message::Cancel(req)
                }
            }
            MessageId::Piece => {
                if body.remaining() < 8 {
                    error!("Piece message too short: expected at least 8 bytes, got {}", body.remaining());
                    return Err(TorrentError::transfer_error_with_source(
                        "Piece message too short",
                        format!("expected at least 8 bytes, got {}", body.remaining()),
                    )
                    .into());
                }
                let index = body.get_u32();
                let begin = body.get_u32();
                Message::Piece { index, begin, block: body }
            }
            MessageId::Port => {
                expect_payload(id, &body, 2)?;
                Message::Port { listen_port: body.get_u16() }
            }
        };

        trace!("Decoded message: {:?}", message.message_id());
        Ok(message)
    }
}

fn expect_payload(id: MessageId, payload: &Bytes, expected: usize) -> Result<()> {
    if payload.len() != expected {
        error!("{:?} message has {} payload bytes, expected {}", id, payload.len(), expected);
        return Err(TorrentError::transfer_error_with_source(
            format!("{:?} message has wrong payload length", id),
            format!("expected {} bytes, got {}", expected, payload.len()),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(message: &Message) -> Bytes {
        message.to_bytes().slice(4..)
    }

    #[test]
    fn test_interested_wire_bytes() {
        assert_eq!(&Message::Interested.to_bytes()[..], &[0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_keepalive_wire_bytes() {
        assert_eq!(&Message::KeepAlive.to_bytes()[..], &[0, 0, 0, 0]);
        assert_eq!(Message::decode_body(Bytes::new()).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_request_wire_bytes() {
        let bytes = Message::Request(BlockRequest::new(1, 16384, 16384)).to_bytes();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn test_decode_piece() {
        let message = Message::Piece {
            index: 10,
            begin: 32,
            block: Bytes::from_static(b"abcde"),
        };
        assert_eq!(message.length(), 14);
        assert_eq!(Message::decode_body(body_of(&message)).unwrap(), message);
    }

    #[test]
    fn test_decode_bitfield_is_opaque() {
        let message = Message::Bitfield { bitfield: Bytes::from_static(&[0b1010_0000, 0xff]) };
        assert_eq!(Message::decode_body(body_of(&message)).unwrap(), message);
    }

    #[test]
    fn test_decode_have_and_cancel() {
        let have = Message::Have { piece_index: 42 };
        assert_eq!(Message::decode_body(body_of(&have)).unwrap(), have);

        let cancel = Message::Cancel(BlockRequest::new(3, 0, 100));
        assert_eq!(Message::decode_body(body_of(&cancel)).unwrap(), cancel);
    }

    #[test]
    fn test_decode_rejects_wrong_payload_length() {
        assert!(Message::decode_body(Bytes::from_static(&[1, 0])).is_err());
        assert!(Message::decode_body(Bytes::from_static(&[4, 0, 0, 1])).is_err());
        assert!(Message::decode_body(Bytes::from_static(&[7, 0, 0, 0, 1, 0, 0])).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_id() {
        let err = Message::decode_body(Bytes::from_static(&[20, 0])).unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::TransferError { .. })));
    }

    #[test]
    fn test_message_id_from_u8() {
        assert_eq!(MessageId::try_from(0).unwrap(), MessageId::Choke);
        assert_eq!(MessageId::try_from(7).unwrap(), MessageId::Piece);
        assert_eq!(MessageId::try_from(9).unwrap(), MessageId::Port);
        assert!(MessageId::try_from(10).is_err());
    }
}
