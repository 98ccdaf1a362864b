//! Protocol configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};

/// UFT protocol settings, shared by sender and receiver sides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum datagram size in bytes, header included.
    /// Must be at least `HEADER_SIZE + 1`.
    pub max_packet_size: usize,

    /// Reorder buffer capacity in packets, per stream.
    /// Exceeding it is a fatal stream error.
    pub buffer_limit: usize,

    /// Time a stream may go without any packet before the sweeper
    /// reclaims it.
    pub idle_timeout: Duration,

    /// Cadence of the idle sweeper, independent of packet arrival.
    pub sweep_interval: Duration,

    /// Bound on one blocking socket read; the stop signal takes effect
    /// within this interval.
    pub recv_timeout: Duration,

    /// Directory in which received files are stored.
    pub out_dir: PathBuf,

    /// Inter-packet pacing delay on the sender (microseconds).
    /// 0 sends at full speed.
    pub packet_interval_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            buffer_limit: 64,
            idle_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_millis(10),
            out_dir: PathBuf::from("."),
            packet_interval_us: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for links with heavy reordering: a deeper reorder buffer,
    /// a longer idle timeout and light sender pacing.
    pub fn lossy_network() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            buffer_limit: 256,
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_millis(10),
            out_dir: PathBuf::from("."),
            packet_interval_us: 50,
        }
    }

    /// Largest Data payload that fits in one datagram.
    pub fn max_payload_size(&self) -> usize {
        self.max_packet_size - HEADER_SIZE
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < HEADER_SIZE + 1 {
            return Err(Error::InvalidConfig(format!(
                "max_packet_size must be at least {} (header size + 1)",
                HEADER_SIZE + 1
            )));
        }
        if self.buffer_limit < 1 {
            return Err(Error::InvalidConfig(
                "buffer_limit must be at least 1 packet".into(),
            ));
        }
        if self.idle_timeout < Duration::from_secs(1) {
            return Err(Error::InvalidConfig(
                "idle_timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}
