//! Sending endpoint
//!
//! Each transfer allocates a stream id, opens its own destination-connected
//! UDP socket and pushes Info, Data chunks and Finalize in order. The
//! pipeline does not wait for acknowledgements and does not retransmit;
//! reliability comes from the receiver's reorder buffer plus the end-to-end
//! checksum.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::packet::{Header, Packet, PacketType, Payload};
use crate::{Config, Error, Result, TransferHash, CHECKSUM_SIZE, MAX_STREAMS};

/// Outgoing stream id allocator over the 8-bit id space.
///
/// A linear scan of 256 slots is plenty for this id space.
pub struct StreamIdPool {
    slots: Mutex<[bool; MAX_STREAMS]>,
}

impl Default for StreamIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamIdPool {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([false; MAX_STREAMS]),
        }
    }

    /// Claims the lowest free stream id.
    pub fn allocate(&self) -> Result<u8> {
        let mut slots = self.slots.lock();
        for (uid, used) in slots.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Ok(uid as u8);
            }
        }
        Err(Error::NoStreamsAvailable)
    }

    pub fn release(&self, uid: u8) {
        self.slots.lock()[uid as usize] = false;
    }

    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|used| **used).count()
    }
}

/// Result of one finished outgoing transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferSummary {
    pub stream_uid: u8,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub checksum: [u8; CHECKSUM_SIZE],
    pub elapsed: Duration,
}

/// Sender handle; transfers may run concurrently, each on its own socket
/// and stream id.
pub struct Sender {
    config: Config,
    pool: Arc<StreamIdPool>,
}

impl Sender {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: Arc::new(StreamIdPool::new()),
        })
    }

    /// Transfers one file to the destination.
    pub async fn send_file(&self, path: &Path, dest: SocketAddr) -> Result<TransferSummary> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "expected a file, not a directory",
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = tokio::fs::File::open(path).await?;
        self.send_stream(file, meta.len(), &filename, dest).await
    }

    /// Transfers an in-memory byte source under the given name.
    pub async fn send_bytes(
        &self,
        filename: &str,
        data: &[u8],
        dest: SocketAddr,
    ) -> Result<TransferSummary> {
        self.send_stream(data, data.len() as u64, filename, dest)
            .await
    }

    async fn send_stream<R: AsyncRead + Unpin>(
        &self,
        mut source: R,
        filesize: u64,
        filename: &str,
        dest: SocketAddr,
    ) -> Result<TransferSummary> {
        let uid = self.pool.allocate()?;
        let result = self
            .run_stream(&mut source, filesize, filename, uid, dest)
            .await;
        self.pool.release(uid);
        result
    }

    async fn run_stream<R: AsyncRead + Unpin>(
        &self,
        source: &mut R,
        filesize: u64,
        filename: &str,
        uid: u8,
        dest: SocketAddr,
    ) -> Result<TransferSummary> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(dest).await?;

        let started = Instant::now();
        let mut hash = TransferHash::new();
        let mut bytes_sent: u64 = 0;
        let mut packets_sent: u64 = 0;

        self.send_packet(
            &socket,
            Packet::new(
                Header::new(0, uid, PacketType::Info),
                Payload::Info {
                    filesize,
                    filename: filename.to_string(),
                },
            ),
        )
        .await?;
        packets_sent += 1;

        debug!(uid, filesize, filename, %dest, "stream announced");

        let mut seq: u32 = 1;
        let mut chunk = vec![0u8; self.config.max_payload_size()];

        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }

            let payload = Bytes::copy_from_slice(&chunk[..n]);
            self.send_packet(
                &socket,
                Packet::new(
                    Header::new(seq, uid, PacketType::Data),
                    Payload::Data(payload.clone()),
                ),
            )
            .await?;

            // accumulate exactly what the receiver will hash
            hash.update(&payload);
            bytes_sent += n as u64;
            packets_sent += 1;
            seq = seq.checked_add(1).ok_or_else(|| {
                Error::ProtocolViolation("sequence number space exhausted".into())
            })?;

            if self.config.packet_interval_us > 0 {
                tokio::time::sleep(Duration::from_micros(self.config.packet_interval_us)).await;
            }
        }

        let checksum = hash.finalize();
        self.send_packet(
            &socket,
            Packet::new(
                Header::new(seq, uid, PacketType::Finalize),
                Payload::Finalize { checksum },
            ),
        )
        .await?;
        packets_sent += 1;

        let elapsed = started.elapsed();
        info!(
            uid,
            bytes_sent,
            packets_sent,
            elapsed_ms = elapsed.as_millis() as u64,
            "transfer sent"
        );

        Ok(TransferSummary {
            stream_uid: uid,
            bytes_sent,
            packets_sent,
            checksum,
            elapsed,
        })
    }

    /// Serializes and transmits one packet, enforcing the datagram size
    /// limit before anything leaves the process.
    async fn send_packet(&self, socket: &UdpSocket, packet: Packet) -> Result<()> {
        let raw = packet.to_bytes();
        if raw.len() > self.config.max_packet_size {
            return Err(Error::PacketTooLarge {
                size: raw.len(),
                max: self.config.max_packet_size,
            });
        }
        socket.send(&raw).await?;
        Ok(())
    }

    pub fn active_transfers(&self) -> usize {
        self.pool.in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocates_all_256_ids() {
        let pool = StreamIdPool::default();
        for expected in 0..MAX_STREAMS {
            assert_eq!(pool.allocate().unwrap(), expected as u8);
        }
        assert_eq!(pool.in_use(), MAX_STREAMS);

        // the 257th concurrent allocation fails
        assert!(matches!(pool.allocate(), Err(Error::NoStreamsAvailable)));
    }

    #[test]
    fn test_pool_reuses_released_ids() {
        let pool = StreamIdPool::new();
        for _ in 0..MAX_STREAMS {
            pool.allocate().unwrap();
        }

        pool.release(17);
        assert_eq!(pool.allocate().unwrap(), 17);
        assert!(matches!(pool.allocate(), Err(Error::NoStreamsAvailable)));
    }

    #[tokio::test]
    async fn test_oversized_info_packet_is_rejected() {
        // smallest legal datagram size: the info packet with a real
        // filename cannot fit
        let config = Config {
            max_packet_size: crate::HEADER_SIZE + 1,
            ..Config::default()
        };
        let sender = Sender::new(config).unwrap();

        // destination never sees a packet; the size check fires first
        let sink_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = sink_socket.local_addr().unwrap();

        let err = sender.send_bytes("x.txt", b"hi", dest).await.unwrap_err();
        assert!(matches!(err, Error::PacketTooLarge { .. }));

        // the stream id went back to the pool
        assert_eq!(sender.active_transfers(), 0);
    }
}
