//! Stream registry
//!
//! Maps the 8-bit stream id to its live [`Transmission`]. The map is shared
//! between the receive dispatch and the idle sweeper; all access goes
//! through the atomic operations here, never through the raw map. Per-entry
//! locking serializes the two, and packets for one stream are only ever
//! processed by the single receive loop, so a `Transmission` is never
//! mutated from two packets at once.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::transmission::{Progress, Transmission};
use crate::{Error, Result};

/// Registry of active incoming streams, keyed by stream id.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<u8, Transmission>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly opened stream. At most one `Transmission` may
    /// exist per stream id.
    pub fn insert_new(&self, transmission: Transmission) -> Result<()> {
        match self.streams.entry(transmission.uid()) {
            Entry::Occupied(_) => Err(Error::ProtocolViolation(format!(
                "stream {} is already active",
                transmission.uid()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(transmission);
                Ok(())
            }
        }
    }

    pub fn is_active(&self, uid: u8) -> bool {
        self.streams.contains_key(&uid)
    }

    /// Runs `f` against the live stream for `uid`, holding its entry lock
    /// for the duration. `None` means the id is unknown: the packet is a
    /// stray and must be dropped without creating state.
    pub fn apply<R>(&self, uid: u8, f: impl FnOnce(&mut Transmission) -> R) -> Option<R> {
        self.streams.get_mut(&uid).map(|mut entry| f(entry.value_mut()))
    }

    /// Deletes the stream; later packets for the id are strays until a new
    /// Info packet arrives.
    pub fn remove(&self, uid: u8) -> Option<Transmission> {
        self.streams.remove(&uid).map(|(_, t)| t)
    }

    /// Removes every stream idle for longer than `timeout` and returns the
    /// reclaimed ids. Runs on a fixed cadence independent of packet arrival.
    pub fn sweep_idle(&self, timeout: Duration) -> Vec<u8> {
        let now = Instant::now();
        let mut removed = Vec::new();

        self.streams.retain(|&uid, transmission| {
            if transmission.is_idle(now, timeout) {
                debug!(uid, "idle stream reclaimed");
                removed.push(uid);
                false
            } else {
                true
            }
        });

        removed
    }

    /// Per-stream snapshots for the polling progress observer.
    pub fn snapshots(&self) -> Vec<Progress> {
        self.streams.iter().map(|e| e.value().progress()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
