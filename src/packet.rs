//! Wire packet codec
//!
//! Every datagram starts with the fixed 6-byte header; the rest is the
//! payload of the type named by the header. All integers little-endian.
//!
//! ```text
//! Header:    [seqNr:4][streamUid:1][packetType:1]
//! Info:      Header + [filesize:8][filename: remaining bytes]
//! Data:      Header + [payload: remaining bytes]
//! Finalize:  Header + [checksum:16]
//! Ack:       Header
//! Error:     Header + [reason: remaining bytes]
//! ```

use bytes::Bytes;

use crate::{Error, Result, CHECKSUM_SIZE, HEADER_SIZE};

/// Packet type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Info = 0x00,
    Data = 0x01,
    Error = 0xFD,
    Ack = 0xFE,
    Finalize = 0xFF,
}

impl PacketType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(PacketType::Info),
            0x01 => Some(PacketType::Data),
            0xFD => Some(PacketType::Error),
            0xFE => Some(PacketType::Ack),
            0xFF => Some(PacketType::Finalize),
            _ => None,
        }
    }
}

/// Fixed packet header
///
/// `packet_type` stays a raw byte so that a header with an unrecognised type
/// still decodes and can be echoed in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Per-stream monotonic packet counter, starts at 0
    pub sequence_nr: u32,

    /// Stream id, one of up to 256 transfers sharing the socket
    pub stream_uid: u8,

    /// Raw packet type byte
    pub packet_type: u8,
}

impl Header {
    pub fn new(sequence_nr: u32, stream_uid: u8, packet_type: PacketType) -> Self {
        Self {
            sequence_nr,
            stream_uid,
            packet_type: packet_type as u8,
        }
    }

    /// Typed view of the raw packet type byte, if recognised.
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..4].copy_from_slice(&self.sequence_nr.to_le_bytes());
        raw[4] = self.stream_uid;
        raw[5] = self.packet_type;
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::TruncatedInput {
                expected: HEADER_SIZE,
                got: raw.len(),
            });
        }
        Ok(Self {
            sequence_nr: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            stream_uid: raw[4],
            packet_type: raw[5],
        })
    }
}

/// Packet payload, one variant per packet type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// First packet of a stream: file size plus requested filename
    Info { filesize: u64, filename: String },

    /// One contiguous slice of the file
    Data(Bytes),

    /// Terminal packet carrying the sender's whole-file checksum
    Finalize { checksum: [u8; CHECKSUM_SIZE] },

    /// Header-only acknowledgement
    Ack,

    /// Stream abort notice with a human-readable reason
    Error { reason: String },
}

impl Payload {
    /// Minimum payload size in bytes for a packet type.
    fn min_size(kind: PacketType) -> usize {
        match kind {
            PacketType::Info => 8,
            PacketType::Data => 0,
            PacketType::Finalize => CHECKSUM_SIZE,
            PacketType::Ack => 0,
            PacketType::Error => 0,
        }
    }

    /// Decodes the payload bytes following a header of type `raw_type`.
    pub fn decode(raw_type: u8, raw: &[u8]) -> Result<Self> {
        let kind = PacketType::from_u8(raw_type).ok_or(Error::UnknownPacketType(raw_type))?;

        let min = Self::min_size(kind);
        if raw.len() < min {
            return Err(Error::TruncatedInput {
                expected: min,
                got: raw.len(),
            });
        }

        Ok(match kind {
            PacketType::Info => {
                let mut filesize = [0u8; 8];
                filesize.copy_from_slice(&raw[..8]);
                Payload::Info {
                    filesize: u64::from_le_bytes(filesize),
                    filename: String::from_utf8_lossy(&raw[8..]).into_owned(),
                }
            }
            PacketType::Data => Payload::Data(Bytes::copy_from_slice(raw)),
            PacketType::Finalize => {
                let mut checksum = [0u8; CHECKSUM_SIZE];
                checksum.copy_from_slice(&raw[..CHECKSUM_SIZE]);
                Payload::Finalize { checksum }
            }
            PacketType::Ack => Payload::Ack,
            PacketType::Error => Payload::Error {
                reason: String::from_utf8_lossy(raw).into_owned(),
            },
        })
    }

    pub fn kind(&self) -> PacketType {
        match self {
            Payload::Info { .. } => PacketType::Info,
            Payload::Data(_) => PacketType::Data,
            Payload::Finalize { .. } => PacketType::Finalize,
            Payload::Ack => PacketType::Ack,
            Payload::Error { .. } => PacketType::Error,
        }
    }

    /// Encoded payload length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Info { filename, .. } => 8 + filename.len(),
            Payload::Data(data) => data.len(),
            Payload::Finalize { .. } => CHECKSUM_SIZE,
            Payload::Ack => 0,
            Payload::Error { reason } => reason.len(),
        }
    }
}

/// A full packet: header plus payload
///
/// The header is encoded verbatim; sequence number and stream id are never
/// derived from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    /// Serializes the packet into one datagram.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.encoded_len());
        buf.extend_from_slice(&self.header.encode());

        match &self.payload {
            Payload::Info { filesize, filename } => {
                buf.extend_from_slice(&filesize.to_le_bytes());
                buf.extend_from_slice(filename.as_bytes());
            }
            Payload::Data(data) => buf.extend_from_slice(data),
            Payload::Finalize { checksum } => buf.extend_from_slice(checksum),
            Payload::Ack => {}
            Payload::Error { reason } => buf.extend_from_slice(reason.as_bytes()),
        }

        buf
    }

    /// Parses one datagram into header and payload.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let header = Header::decode(raw)?;
        let payload = Payload::decode(header.packet_type, &raw[HEADER_SIZE..])?;
        Ok(Self { header, payload })
    }
}
