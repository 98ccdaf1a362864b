//! UFT receiver daemon - UDP File Transfer
//!
//! Listens for incoming file streams and writes them to the output
//! directory. Each stream is reassembled in order and verified against the
//! sender's checksum before it counts as complete.
//!
//! Usage:
//!   cargo run --release --bin uft-server -- [OPTIONS]
//!
//! Examples:
//!   # listen on the default port, store files in the current directory
//!   cargo run --release --bin uft-server -- --bind 0.0.0.0:9000
//!
//!   # dedicated output directory and a deeper reorder buffer
//!   cargo run --release --bin uft-server -- -b 0.0.0.0:9000 -o /srv/incoming --buffer-limit 256

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use uft::{Config, Receiver};

struct ServerConfig {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("valid bind address required");
                    i += 1;
                }
            }
            "--out-dir" | "-o" => {
                if i + 1 < args.len() {
                    config.config.out_dir = PathBuf::from(&args[i + 1]);
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
            "--buffer-limit" => {
                if i + 1 < args.len() {
                    config.config.buffer_limit =
                        args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("valid number required");
                    config.config.idle_timeout = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"UFT Server - UDP File Transfer receiver

Receives file streams over UDP, reorders out-of-order packets and
verifies each finished file against the sender's checksum.

Usage:
  cargo run --release --bin uft-server -- [OPTIONS]

Options:
  -b, --bind <ADDR>       bind address (default: 0.0.0.0:9000)
  -o, --out-dir <DIR>     output directory for received files (default: .)
  --packet-size <SIZE>    maximum datagram size in bytes (default: 512)
  --buffer-limit <N>      reorder buffer capacity per stream (default: 64)
  --timeout <SECS>        idle seconds before a stream is reclaimed (default: 10)
  -h, --help              print this help

Examples:
  # receive into /srv/incoming
  cargo run --release --bin uft-server -- -b 0.0.0.0:9000 -o /srv/incoming

  # settings for a link with heavy reordering
  cargo run --release --bin uft-server -- --buffer-limit 256 --timeout 30
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

    let server_config = parse_args();

    info!("UFT Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Output directory: {:?}", server_config.config.out_dir);
    info!(
        "Packet size: {} bytes, buffer limit: {} packets, idle timeout: {:?}",
        server_config.config.max_packet_size,
        server_config.config.buffer_limit,
        server_config.config.idle_timeout
    );

    let (receiver, mut errors) =
        Receiver::start(server_config.config, server_config.bind_addr).await?;

    // stream failures arrive on the error channel; log and keep serving
    tokio::spawn(async move {
        while let Some(report) = errors.recv().await {
            match report.stream_uid {
                Some(uid) => warn!(uid, "stream failed: {}", report.error),
                None => warn!("receive error: {}", report.error),
            }
        }
    });

    // progress report once per second while streams are active
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for progress in receiver.progress() {
                    let percent = if progress.total_size > 0 {
                        progress.transmitted_size as f64 / progress.total_size as f64 * 100.0
                    } else {
                        100.0
                    };
                    info!(
                        "stream {}: {}/{} bytes ({:.1}%)",
                        progress.stream_uid, progress.transmitted_size, progress.total_size, percent
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                receiver.stop();
                break;
            }
        }
    }

    Ok(())
}
