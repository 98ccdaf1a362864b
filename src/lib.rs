//! # UFT (UDP File Transfer)
//!
//! Stream-multiplexed reliable file transfer over plain UDP datagrams.
//!
//! ## Core pieces
//! - **Fixed 6-byte header**: sequence number, stream id, packet type
//! - **Up to 256 concurrent streams** per socket, one byte of id space
//! - **Reorder buffer**: bounded per-stream holding area for early packets
//! - **End-to-end integrity**: streaming 128-bit checksum over the payload
//!   bytes in sequence order, verified by the terminal Finalize packet
//! - **Idle eviction**: streams that stop sending are reclaimed by a sweeper
//!
//! The sender transmits Info/Data/Finalize without waiting for
//! acknowledgements; reliability comes from receiver-side reordering plus
//! checksum verification.

pub mod config;
pub mod error;
pub mod hash;
pub mod packet;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod transmission;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::TransferHash;
pub use packet::{Header, Packet, PacketType, Payload};
pub use receiver::{Receiver, StreamError};
pub use registry::StreamRegistry;
pub use sender::{Sender, TransferSummary};
pub use transmission::{Applied, Progress, Transmission};

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 6;

/// Size of the Finalize checksum in bytes.
pub const CHECKSUM_SIZE: usize = 16;

/// Number of stream ids sharing one socket (8-bit id space).
pub const MAX_STREAMS: usize = 256;

/// Default maximum datagram size in bytes.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 512;
