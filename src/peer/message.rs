use super::error::PeerError;
use super::peer_id::PeerId;
use crate::constants::{HANDSHAKE_HEADER_LEN, HANDSHAKE_LEN, HANDSHAKE_PREAMBLE, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

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
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// The fixed preamble and peer ID exchanged before any message.
///
/// Layout: 18-byte ASCII literal, 10 zero bytes, 4-byte big-endian peer ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(HANDSHAKE_PREAMBLE);
        buf.put_bytes(0, HANDSHAKE_HEADER_LEN - HANDSHAKE_PREAMBLE.len());
        buf.put_slice(&self.peer_id.to_be_bytes());
        buf.freeze()
    }

    /// Decodes a handshake, failing with [`PeerError::HandshakeMismatch`] on a
    /// wrong preamble, non-zero padding or a negative peer ID.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::HandshakeMismatch);
        }

        let (preamble, padding) = data[..HANDSHAKE_HEADER_LEN].split_at(HANDSHAKE_PREAMBLE.len());
        if preamble != HANDSHAKE_PREAMBLE || padding.iter().any(|&b| b != 0) {
            return Err(PeerError::HandshakeMismatch);
        }

        let mut id = &data[HANDSHAKE_HEADER_LEN..HANDSHAKE_LEN];
        let peer_id = PeerId::from_wire(id.get_i32()).ok_or(PeerError::HandshakeMismatch)?;
        Ok(Self { peer_id })
    }
}

/// A framed protocol message.
///
/// Frames are `length: u32 BE | type: u8 | payload`, where `length` counts
/// the type byte and the payload but not itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { piece: u32 },
    Piece { piece: u32, data: Bytes },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
        }
    }

    /// Encodes the frame. Fails if it would exceed [`MAX_FRAME_SIZE`], which
    /// the receiving side rejects.
    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let mut buf = BytesMut::new();

        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(self.id() as u8);
            }
            Message::Have { piece } | Message::Request { piece } => {
                buf.put_u32(5);
                buf.put_u8(self.id() as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                let length = frame_length(1, bits.len())?;
                buf.reserve(4 + length as usize);
                buf.put_u32(length);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Piece { piece, data } => {
                let length = frame_length(5, data.len())?;
                buf.reserve(4 + length as usize);
                buf.put_u32(length);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*piece);
                buf.put_slice(data);
            }
        }

        Ok(buf.freeze())
    }

    /// Decodes one complete frame, including its length prefix.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;

        if length == 0 {
            return Err(PeerError::InvalidMessage("empty frame".into()));
        }

        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;
        let payload_len = length - 1;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if payload_len != 4 {
                    return Err(PeerError::InvalidMessage("have payload".into()));
                }
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(payload_len))),
            MessageId::Request => {
                if payload_len != 4 {
                    return Err(PeerError::InvalidMessage("request payload".into()));
                }
                Ok(Message::Request {
                    piece: data.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload_len < 4 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let piece = data.get_u32();
                let block = data.copy_to_bytes(payload_len - 4);
                Ok(Message::Piece { piece, data: block })
            }
        }
    }
}

fn frame_length(header: usize, payload: usize) -> Result<u32, PeerError> {
    header
        .checked_add(payload)
        .filter(|&length| length <= MAX_FRAME_SIZE)
        .and_then(|length| u32::try_from(length).ok())
        .ok_or_else(|| {
            PeerError::InvalidMessage(format!("message too large: {payload} byte payload"))
        })
}
