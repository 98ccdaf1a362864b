//! UFT sender CLI - UDP File Transfer
//!
//! Sends one file to a UFT receiver. The pipeline pushes the whole stream
//! without waiting for acknowledgements; the receiver verifies the checksum
//! at the end.
//!
//! Usage:
//!   cargo run --release --bin uft-client -- [OPTIONS]
//!
//! Examples:
//!   cargo run --release --bin uft-client -- --dest 127.0.0.1:9000 --file data.bin
//!
//!   # pace packets for a lossy link
//!   cargo run --release --bin uft-client -- -d 127.0.0.1:9000 -f data.bin --interval 50

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use uft::{Config, Sender};

struct ClientConfig {
    dest_addr: SocketAddr,
    file_path: Option<PathBuf>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dest_addr: "127.0.0.1:9000".parse().unwrap(),
            file_path: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dest" | "-d" => {
                if i + 1 < args.len() {
                    config.dest_addr = args[i + 1].parse().expect("valid destination required");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--packet-size" => {
                if i + 1 < args.len() {
                    config.config.max_packet_size =
                        args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--interval" => {
                if i + 1 < args.len() {
                    config.config.packet_interval_us =
                        args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"UFT Client - UDP File Transfer sender

Sends one file to a UFT receiver over UDP.

Usage:
  cargo run --release --bin uft-client -- [OPTIONS]

Options:
  -d, --dest <ADDR>       receiver address (default: 127.0.0.1:9000)
  -f, --file <PATH>       file to send (required)
  --packet-size <SIZE>    maximum datagram size in bytes (default: 512)
  --interval <MICROS>     inter-packet pacing delay, 0 = full speed (default: 0)
  -h, --help              print this help

Examples:
  cargo run --release --bin uft-client -- -d 192.168.0.10:9000 -f backup.tar

  # 50 microseconds between packets
  cargo run --release --bin uft-client -- -d 192.168.0.10:9000 -f backup.tar --interval 50
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args();

    let path = match &client_config.file_path {
        Some(p) => p.clone(),
        None => {
            eprintln!("error: --file is required (see --help)");
            std::process::exit(1);
        }
    };

    info!("UFT Client starting...");
    info!("Destination: {}", client_config.dest_addr);
    info!("File: {:?}", path);

    let sender = Sender::new(client_config.config)?;
    let summary = sender.send_file(&path, client_config.dest_addr).await?;

    let secs = summary.elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        summary.bytes_sent as f64 / secs / (1024.0 * 1024.0)
    } else {
        0.0
    };

    info!("Transfer sent on stream {}", summary.stream_uid);
    info!(
        "  {} bytes in {} packets, {:.2}s ({:.2} MB/s)",
        summary.bytes_sent, summary.packets_sent, secs, throughput
    );
    info!("  checksum: {:02x?}", summary.checksum);

    Ok(())
}
