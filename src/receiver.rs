//! Receiving endpoint
//!
//! One task owns the UDP socket and runs the receive loop: decode, registry
//! dispatch, state-machine apply, acknowledge. A second task sweeps idle
//! streams on a fixed cadence. A single bad datagram never terminates the
//! loop; stream-fatal conditions remove that stream and are reported on the
//! error channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::packet::{Header, Packet, PacketType, Payload};
use crate::registry::StreamRegistry;
use crate::transmission::{Applied, Progress, Transmission};
use crate::{Config, Error, Result};

/// Stream-level failure report emitted on the receiver's error channel.
///
/// The receiver keeps running; the collaborator on the other end decides
/// how to persist or print these.
#[derive(Debug)]
pub struct StreamError {
    pub stream_uid: Option<u8>,
    pub header: Option<Header>,
    pub error: Error,
}

/// Receiver handle; the actual work happens on spawned tasks.
pub struct Receiver {
    registry: Arc<StreamRegistry>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl Receiver {
    /// Binds the listening socket and starts the receive loop and the idle
    /// sweeper. A bind failure is unrecoverable and propagates.
    pub async fn start(
        config: Config,
        bind_addr: SocketAddr,
    ) -> Result<(Self, mpsc::Receiver<StreamError>)> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;

        let registry = Arc::new(StreamRegistry::new());
        let running = Arc::new(AtomicBool::new(true));
        let (err_tx, err_rx) = mpsc::channel::<StreamError>(64);

        info!("UFT receiver listening on {}", local_addr);

        // receive loop
        let loop_socket = socket.clone();
        let loop_registry = registry.clone();
        let loop_running = running.clone();
        let loop_config = config.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; loop_config.max_packet_size];

            while loop_running.load(Ordering::SeqCst) {
                match tokio::time::timeout(
                    loop_config.recv_timeout,
                    loop_socket.recv_from(&mut buf),
                )
                .await
                {
                    Ok(Ok((len, addr))) => {
                        handle_datagram(
                            &loop_registry,
                            &loop_config,
                            &loop_socket,
                            &err_tx,
                            &buf[..len],
                            addr,
                        )
                        .await;
                    }
                    Ok(Err(e)) => {
                        warn!("socket receive error: {}", e);
                        let _ = err_tx.try_send(StreamError {
                            stream_uid: None,
                            header: None,
                            error: Error::Io(e),
                        });
                    }
                    Err(_) => {
                        // read timeout, re-check the stop flag
                    }
                }
            }
        });

        // idle sweeper, independent of packet arrival
        let sweep_registry = registry.clone();
        let sweep_running = running.clone();
        let sweep_interval = config.sweep_interval;
        let idle_timeout = config.idle_timeout;

        tokio::spawn(async move {
            while sweep_running.load(Ordering::SeqCst) {
                tokio::time::sleep(sweep_interval).await;
                for uid in sweep_registry.sweep_idle(idle_timeout) {
                    warn!(uid, "stream timed out and was reclaimed");
                }
            }
        });

        let receiver = Self {
            registry,
            running,
            local_addr,
        };
        Ok((receiver, err_rx))
    }

    /// Requests a cooperative stop; takes effect within one socket read
    /// timeout. In-flight stream state is abandoned.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Read-only snapshots of all active streams, polled by the observer.
    pub fn progress(&self) -> Vec<Progress> {
        self.registry.snapshots()
    }

    pub fn active_streams(&self) -> usize {
        self.registry.len()
    }
}

/// What the dispatch decided to do with one datagram.
enum Disposition {
    /// Processed; acknowledge the echoed header.
    Ack,
    /// Stray or duplicate; no state change, no response.
    Ignore,
    /// Stream finished; released, acknowledged and logged.
    Completed,
    /// Stream-fatal; released, reported, peer notified.
    Fatal(Error),
}

async fn handle_datagram(
    registry: &StreamRegistry,
    config: &Config,
    socket: &UdpSocket,
    err_tx: &mpsc::Sender<StreamError>,
    raw: &[u8],
    src: SocketAddr,
) {
    let header = match Header::decode(raw) {
        Ok(h) => h,
        Err(e) => {
            let _ = err_tx.try_send(StreamError {
                stream_uid: None,
                header: None,
                error: e,
            });
            return;
        }
    };

    let uid = header.stream_uid;
    let payload = match Payload::decode(header.packet_type, &raw[crate::HEADER_SIZE..]) {
        Ok(p) => p,
        Err(e) => {
            // a malformed packet inside an active stream aborts the stream
            registry.remove(uid);
            let _ = err_tx.try_send(StreamError {
                stream_uid: Some(uid),
                header: Some(header),
                error: e,
            });
            return;
        }
    };

    let disposition = dispatch(registry, config, header, payload);

    match disposition {
        Disposition::Ack => send_ack(socket, header, src).await,
        Disposition::Completed => {
            info!(uid, "transfer complete");
            send_ack(socket, header, src).await;
        }
        Disposition::Ignore => {}
        Disposition::Fatal(error) => {
            let reason = error.to_string();
            warn!(uid, %error, "stream aborted");
            let _ = err_tx.try_send(StreamError {
                stream_uid: Some(uid),
                header: Some(header),
                error,
            });
            send_error(socket, header, &reason, src).await;
        }
    }
}

/// Applies one decoded packet against the registry. Synchronous: entry
/// locks are released before any response is sent.
fn dispatch(
    registry: &StreamRegistry,
    config: &Config,
    header: Header,
    payload: Payload,
) -> Disposition {
    let uid = header.stream_uid;

    match payload {
        Payload::Info { filesize, filename } => {
            if registry.is_active(uid) {
                registry.remove(uid);
                return Disposition::Fatal(Error::ProtocolViolation(format!(
                    "info packet for already active stream {uid}"
                )));
            }
            if header.sequence_nr != 0 {
                return Disposition::Fatal(Error::ProtocolViolation(format!(
                    "info packet with non-zero sequence number {}",
                    header.sequence_nr
                )));
            }

            match Transmission::open(uid, filesize, &filename, config) {
                Ok(transmission) => {
                    debug!(uid, filesize, filename = %filename, "stream started");
                    match registry.insert_new(transmission) {
                        Ok(()) => Disposition::Ack,
                        Err(e) => Disposition::Fatal(e),
                    }
                }
                Err(e) => Disposition::Fatal(e),
            }
        }

        Payload::Data(data) => {
            match registry.apply(uid, |t| t.apply_data(header.sequence_nr, data)) {
                None => {
                    // stray packet for an unknown stream, expected under
                    // reordering; dropped without creating state
                    debug!(uid, seq = header.sequence_nr, "stray data packet dropped");
                    Disposition::Ignore
                }
                Some(outcome) => settle(registry, uid, outcome),
            }
        }

        Payload::Finalize { checksum } => {
            match registry.apply(uid, |t| t.apply_finalize(header.sequence_nr, checksum)) {
                None => {
                    debug!(uid, "stray finalize packet dropped");
                    Disposition::Ignore
                }
                Some(outcome) => settle(registry, uid, outcome),
            }
        }

        // the receiving side never consumes these
        Payload::Ack => Disposition::Ignore,
        Payload::Error { reason } => {
            debug!(uid, reason = %reason, "error packet ignored");
            Disposition::Ignore
        }
    }
}

/// Turns a state-machine outcome into a disposition, releasing the stream
/// when it is done or broken.
fn settle(registry: &StreamRegistry, uid: u8, outcome: Result<Applied>) -> Disposition {
    match outcome {
        Ok(Applied::Progress) => Disposition::Ack,
        Ok(Applied::Completed) => {
            registry.remove(uid);
            Disposition::Completed
        }
        Ok(Applied::Failed(e)) => {
            registry.remove(uid);
            Disposition::Fatal(e)
        }
        Err(e) => {
            registry.remove(uid);
            Disposition::Fatal(e)
        }
    }
}

async fn send_ack(socket: &UdpSocket, header: Header, dst: SocketAddr) {
    let ack = Packet::new(
        Header::new(header.sequence_nr, header.stream_uid, PacketType::Ack),
        Payload::Ack,
    );
    if let Err(e) = socket.send_to(&ack.to_bytes(), dst).await {
        warn!("failed to send ack: {}", e);
    }
}

async fn send_error(socket: &UdpSocket, header: Header, reason: &str, dst: SocketAddr) {
    let packet = Packet::new(
        Header::new(header.sequence_nr, header.stream_uid, PacketType::Error),
        Payload::Error {
            reason: reason.to_string(),
        },
    );
    // best effort, the stream is already gone
    let _ = socket.send_to(&packet.to_bytes(), dst).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            out_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (receiver, _errors) = Receiver::start(config, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        assert!(receiver.is_running());
        assert_eq!(receiver.active_streams(), 0);

        receiver.stop();
        assert!(!receiver.is_running());

        // the loop exits within one read timeout
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config {
            max_packet_size: 3,
            ..Config::default()
        };
        let result = Receiver::start(config, "127.0.0.1:0".parse().unwrap()).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
