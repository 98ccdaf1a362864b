//! Per-stream transmission state machine
//!
//! One `Transmission` exists per active stream id, created by the first
//! accepted Info packet and destroyed on completion, stream error or idle
//! timeout. It reconstructs the ordered byte stream from out-of-order
//! datagrams:
//! - in-order Data goes straight to the sink and the hash
//! - early Data waits in a bounded reorder buffer
//! - late Data (already applied) is a retransmission and is dropped
//! - an early Finalize is held until the gap in front of it closes

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tracing::debug;

use crate::{Config, Error, Result, TransferHash, CHECKSUM_SIZE};

/// Attempts at finding a collision-free destination name.
const NAME_ATTEMPTS: usize = 100;

/// Outcome of applying one packet to the stream state.
#[derive(Debug)]
pub enum Applied {
    /// Stream is still receiving.
    Progress,

    /// Finalize checksum matched; the stream is done and must be released.
    Completed,

    /// Finalize checksum did not match; the stream must be released.
    /// The partial file stays on disk.
    Failed(Error),
}

/// Read-only per-stream snapshot for a polling progress observer.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub stream_uid: u8,
    pub transmitted_size: u64,
    pub total_size: u64,
    pub start_time: Instant,
}

/// State of one incoming stream.
pub struct Transmission {
    uid: u8,

    /// Next in-order sequence number required for delivery to the sink.
    /// Only ever increases.
    expected_seq: u32,

    total_size: u64,
    transmitted_size: u64,

    start_time: Instant,
    last_updated: Instant,

    hash: TransferHash,

    /// Data payloads that arrived ahead of `expected_seq`.
    buffer: HashMap<u32, Bytes>,
    buffer_limit: usize,

    /// Finalize that arrived ahead of its turn, at most one.
    pending_finalize: Option<(u32, [u8; CHECKSUM_SIZE])>,

    sink: Box<dyn Write + Send + Sync>,
    dest_path: Option<PathBuf>,
}

impl Transmission {
    /// Opens a new stream from its accepted Info packet: resolves the
    /// destination path under `config.out_dir` and creates the sink.
    ///
    /// The stream starts expecting sequence number 1, the Info packet
    /// having consumed 0.
    pub fn open(uid: u8, filesize: u64, filename: &str, config: &Config) -> Result<Self> {
        let path = resolve_destination(&config.out_dir, filename)?;

        // create_new catches the race where the path appeared between the
        // resolution check and the open
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    Error::DestinationExists(path.clone())
                } else {
                    Error::Io(e)
                }
            })?;

        debug!(uid, filesize, path = %path.display(), "stream opened");

        let mut t = Self::with_sink(
            uid,
            filesize,
            Box::new(BufWriter::new(file)),
            config.buffer_limit,
        );
        t.dest_path = Some(path);
        Ok(t)
    }

    /// Builds a stream over an arbitrary sink. The receiving path goes
    /// through [`Transmission::open`]; this exists for in-process sinks.
    pub fn with_sink(
        uid: u8,
        filesize: u64,
        sink: Box<dyn Write + Send + Sync>,
        buffer_limit: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            uid,
            expected_seq: 1,
            total_size: filesize,
            transmitted_size: 0,
            start_time: now,
            last_updated: now,
            hash: TransferHash::new(),
            buffer: HashMap::new(),
            buffer_limit,
            pending_finalize: None,
            sink,
            dest_path: None,
        }
    }

    /// Applies a Data packet.
    ///
    /// In-order payloads are written and hashed immediately and the reorder
    /// buffer is drained behind them; early payloads are buffered; late
    /// payloads are duplicate retransmissions and are silently dropped.
    pub fn apply_data(&mut self, seq: u32, payload: Bytes) -> Result<Applied> {
        self.last_updated = Instant::now();

        if seq < self.expected_seq {
            debug!(uid = self.uid, seq, "duplicate data packet dropped");
            return Ok(Applied::Progress);
        }

        if seq > self.expected_seq {
            if self.buffer.contains_key(&seq) {
                debug!(uid = self.uid, seq, "duplicate buffered packet dropped");
                return Ok(Applied::Progress);
            }
            if self.buffer.len() >= self.buffer_limit {
                return Err(Error::BufferFull {
                    limit: self.buffer_limit,
                });
            }
            self.buffer.insert(seq, payload);
            return Ok(Applied::Progress);
        }

        self.write_in_order(&payload)?;
        self.drain_buffer()
    }

    /// Applies a Finalize packet. Held if packets are still missing in
    /// front of it, verified otherwise.
    pub fn apply_finalize(&mut self, seq: u32, checksum: [u8; CHECKSUM_SIZE]) -> Result<Applied> {
        self.last_updated = Instant::now();

        if seq != self.expected_seq {
            if self.pending_finalize.is_some() {
                return Err(Error::ProtocolViolation(
                    "duplicate early finalize packet".into(),
                ));
            }
            self.pending_finalize = Some((seq, checksum));
            return Ok(Applied::Progress);
        }

        Ok(self.finish(checksum))
    }

    /// Writes one in-order payload and advances the expected sequence
    /// number.
    fn write_in_order(&mut self, payload: &[u8]) -> Result<()> {
        self.sink.write_all(payload)?;
        self.hash.update(payload);
        self.transmitted_size += payload.len() as u64;

        // refuse to wrap rather than silently corrupt ordering
        self.expected_seq = self.expected_seq.checked_add(1).ok_or_else(|| {
            Error::ProtocolViolation("sequence number space exhausted".into())
        })?;
        Ok(())
    }

    /// Applies buffered payloads until the next gap, then a pending
    /// Finalize if its turn has come.
    fn drain_buffer(&mut self) -> Result<Applied> {
        while let Some(payload) = self.buffer.remove(&self.expected_seq) {
            self.write_in_order(&payload)?;
        }

        if let Some(&(seq, checksum)) = self.pending_finalize.as_ref() {
            if seq == self.expected_seq {
                self.pending_finalize = None;
                return Ok(self.finish(checksum));
            }
        }

        Ok(Applied::Progress)
    }

    /// Flushes the sink and verifies the sender checksum. Either way the
    /// file stays on disk; a mismatch only flags the stream as failed.
    fn finish(&mut self, expected: [u8; CHECKSUM_SIZE]) -> Applied {
        if let Err(e) = self.sink.flush() {
            return Applied::Failed(Error::Io(e));
        }

        let actual = self.hash.finalize();
        if actual == expected {
            Applied::Completed
        } else {
            Applied::Failed(Error::IntegrityMismatch { expected, actual })
        }
    }

    /// True once no packet has touched this stream for `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_updated) > timeout
    }

    pub fn progress(&self) -> Progress {
        Progress {
            stream_uid: self.uid,
            transmitted_size: self.transmitted_size,
            total_size: self.total_size,
            start_time: self.start_time,
        }
    }

    pub fn uid(&self) -> u8 {
        self.uid
    }

    pub fn dest_path(&self) -> Option<&Path> {
        self.dest_path.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.last_updated -= by;
    }
}

impl std::fmt::Debug for Transmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmission")
            .field("uid", &self.uid)
            .field("expected_seq", &self.expected_seq)
            .field("transmitted_size", &self.transmitted_size)
            .field("total_size", &self.total_size)
            .field("buffered", &self.buffer.len())
            .field("pending_finalize", &self.pending_finalize.is_some())
            .finish()
    }
}

/// Resolves the destination path for a requested filename.
///
/// Only the final path component of the request is used. An empty name, or
/// a name already occupied, gets a random numeric suffix; after
/// `NAME_ATTEMPTS` collisions the resolution gives up with `NoSuitableName`.
fn resolve_destination(out_dir: &Path, requested: &str) -> Result<PathBuf> {
    let base = Path::new(requested)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if base.is_empty() {
        return randomized_name(out_dir, "transfer_");
    }

    let candidate = out_dir.join(&base);
    if !candidate.exists() {
        return Ok(candidate);
    }

    randomized_name(out_dir, &format!("{base}_"))
}

fn randomized_name(out_dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut rng = rand::thread_rng();
    for _ in 0..NAME_ATTEMPTS {
        let candidate = out_dir.join(format!("{prefix}{:06}", rng.gen_range(0..1_000_000u32)));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::NoSuitableName)
}
