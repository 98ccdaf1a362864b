//! End-to-end transfer tests over loopback UDP.
//!
//! The happy paths drive the public `Sender`; the protocol edge cases craft
//! raw datagrams so reordering, duplication and corruption are exact.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use uft::{
    Config, Error, Header, Packet, PacketType, Payload, Receiver, Sender, StreamError,
    TransferHash,
};

async fn spawn_receiver(out_dir: &Path) -> (Receiver, mpsc::Receiver<StreamError>, SocketAddr) {
    let config = Config {
        out_dir: out_dir.to_path_buf(),
        ..Config::default()
    };
    let (receiver, errors) = Receiver::start(config, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = receiver.local_addr();
    (receiver, errors, addr)
}

/// Polls until `path` holds exactly `expected` bytes, or panics after ~2s.
async fn wait_for_file(path: &Path, expected: &[u8]) {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read(path) {
            if contents == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("file {:?} never reached the expected contents", path);
}

async fn send_raw(socket: &UdpSocket, packet: Packet, dest: SocketAddr) {
    socket.send_to(&packet.to_bytes(), dest).await.unwrap();
}

fn info(uid: u8, filesize: u64, filename: &str) -> Packet {
    Packet::new(
        Header::new(0, uid, PacketType::Info),
        Payload::Info {
            filesize,
            filename: filename.to_string(),
        },
    )
}

fn data(uid: u8, seq: u32, bytes: &'static [u8]) -> Packet {
    Packet::new(Header::new(seq, uid, PacketType::Data), Payload::Data(bytes.into()))
}

fn finalize(uid: u8, seq: u32, checksum: [u8; 16]) -> Packet {
    Packet::new(
        Header::new(seq, uid, PacketType::Finalize),
        Payload::Finalize { checksum },
    )
}

fn digest(chunks: &[&[u8]]) -> [u8; 16] {
    let mut hash = TransferHash::new();
    for chunk in chunks {
        hash.update(chunk);
    }
    hash.finalize()
}

#[tokio::test]
async fn test_small_transfer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let sender = Sender::new(Config::default()).unwrap();
    let summary = sender.send_bytes("x.txt", b"hello world", addr).await.unwrap();

    assert_eq!(summary.bytes_sent, 11);
    // info + one data chunk + finalize
    assert_eq!(summary.packets_sent, 3);

    wait_for_file(&dir.path().join("x.txt"), b"hello world").await;
    receiver.stop();
}

#[tokio::test]
async fn test_multi_chunk_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    // several datagrams worth of non-uniform data
    let payload: Vec<u8> = (0..8000u32).map(|i| (i % 251) as u8).collect();
    let src = dir.path().join("source.bin");
    std::fs::write(&src, &payload).unwrap();

    // light pacing so loopback never drops under burst
    let sender = Sender::new(Config {
        packet_interval_us: 10,
        ..Config::default()
    })
    .unwrap();
    let summary = sender.send_file(&src, addr).await.unwrap();
    assert_eq!(summary.bytes_sent, payload.len() as u64);

    wait_for_file(&dir.path().join("source.bin"), &payload).await;
    receiver.stop();
}

#[tokio::test]
async fn test_out_of_order_packets_are_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let checksum = digest(&[b"hello ", b"world"]);

    send_raw(&socket, info(7, 11, "reordered.txt"), addr).await;
    // second chunk arrives before the first
    send_raw(&socket, data(7, 2, b"world"), addr).await;
    send_raw(&socket, data(7, 1, b"hello "), addr).await;
    send_raw(&socket, finalize(7, 3, checksum), addr).await;

    wait_for_file(&dir.path().join("reordered.txt"), b"hello world").await;
    receiver.stop();
}

#[tokio::test]
async fn test_early_finalize_is_held_until_data_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let checksum = digest(&[b"payload"]);

    send_raw(&socket, info(1, 7, "early.txt"), addr).await;
    // finalize overtakes the data packet
    send_raw(&socket, finalize(1, 2, checksum), addr).await;
    send_raw(&socket, data(1, 1, b"payload"), addr).await;

    wait_for_file(&dir.path().join("early.txt"), b"payload").await;
    receiver.stop();
}

#[tokio::test]
async fn test_duplicate_packets_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let checksum = digest(&[b"once"]);

    send_raw(&socket, info(2, 4, "dup.txt"), addr).await;
    send_raw(&socket, data(2, 1, b"once"), addr).await;
    send_raw(&socket, data(2, 1, b"once"), addr).await;
    send_raw(&socket, finalize(2, 2, checksum), addr).await;

    wait_for_file(&dir.path().join("dup.txt"), b"once").await;
    receiver.stop();
}

#[tokio::test]
async fn test_checksum_mismatch_is_reported_and_file_remains() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    send_raw(&socket, info(3, 3, "bad.txt"), addr).await;
    send_raw(&socket, data(3, 1, b"abc"), addr).await;
    send_raw(&socket, finalize(3, 2, [0u8; 16]), addr).await;

    let report = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .expect("no failure report within 2s")
        .expect("error channel closed");

    assert_eq!(report.stream_uid, Some(3));
    assert!(matches!(report.error, Error::IntegrityMismatch { .. }));

    // the partial file stays on disk for inspection
    wait_for_file(&dir.path().join("bad.txt"), b"abc").await;
    receiver.stop();
}

#[tokio::test]
async fn test_colliding_filename_gets_a_fresh_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.txt"), b"original").unwrap();

    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let sender = Sender::new(Config::default()).unwrap();
    sender.send_bytes("x.txt", b"incoming", addr).await.unwrap();

    // the transfer lands under a randomized variant of the name
    let mut found = false;
    for _ in 0..100 {
        found = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with("x.txt_")
                    && std::fs::read(e.path()).map(|c| c == b"incoming").unwrap_or(false)
            });
        if found {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found, "no randomized destination file appeared");

    // the pre-existing file is untouched
    assert_eq!(std::fs::read(dir.path().join("x.txt")).unwrap(), b"original");
    receiver.stop();
}

#[tokio::test]
async fn test_stray_data_packet_creates_no_stream() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_raw(&socket, data(9, 1, b"orphan"), addr).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(receiver.active_streams(), 0);
    receiver.stop();
}

#[tokio::test]
async fn test_second_info_for_active_stream_aborts_it() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, mut errors, addr) = spawn_receiver(dir.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_raw(&socket, info(4, 100, "first.txt"), addr).await;
    send_raw(&socket, info(4, 100, "second.txt"), addr).await;

    let report = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .expect("no failure report within 2s")
        .expect("error channel closed");

    assert_eq!(report.stream_uid, Some(4));
    assert!(matches!(report.error, Error::ProtocolViolation(_)));

    // the stream is gone, its id can be reused
    for _ in 0..100 {
        if receiver.active_streams() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(receiver.active_streams(), 0);
    receiver.stop();
}

#[tokio::test]
async fn test_silent_stream_is_reclaimed_by_the_sweeper() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        out_dir: dir.path().to_path_buf(),
        idle_timeout: Duration::from_secs(1),
        sweep_interval: Duration::from_millis(100),
        ..Config::default()
    };
    let (receiver, _errors) = Receiver::start(config, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = receiver.local_addr();

    // announce a stream, then go silent
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_raw(&socket, info(6, 100, "abandoned.txt"), addr).await;

    for _ in 0..100 {
        if receiver.active_streams() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(receiver.active_streams(), 1);

    // the sweeper reclaims it without any further packet
    for _ in 0..150 {
        if receiver.active_streams() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(receiver.active_streams(), 0);
    receiver.stop();
}

#[tokio::test]
async fn test_concurrent_streams_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let (receiver, _errors, addr) = spawn_receiver(dir.path()).await;

    let sender = Sender::new(Config::default()).unwrap();
    let (a, b) = tokio::join!(
        sender.send_bytes("a.txt", b"stream a", addr),
        sender.send_bytes("b.txt", b"stream b", addr),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.stream_uid, b.stream_uid);

    wait_for_file(&dir.path().join("a.txt"), b"stream a").await;
    wait_for_file(&dir.path().join("b.txt"), b"stream b").await;
    receiver.stop();
}
