//! End-to-end integrity hash
//!
//! Sender and receiver accumulate the same streaming 128-bit xxh3 digest
//! over Data payload bytes in sequence order. Headers and Info/Finalize
//! payloads are never hashed.

use xxhash_rust::xxh3::Xxh3;

use crate::CHECKSUM_SIZE;

/// Streaming checksum state, one instance per stream.
#[derive(Default)]
pub struct TransferHash {
    inner: Xxh3,
}

impl TransferHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates payload bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Returns the 16-byte digest of everything accumulated so far.
    ///
    /// Does not consume the state, so calling it is harmless; a new stream
    /// still needs a fresh instance.
    pub fn finalize(&self) -> [u8; CHECKSUM_SIZE] {
        self.inner.digest128().to_le_bytes()
    }
}

impl std::fmt::Debug for TransferHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransferHash({:02x?})", self.finalize())
    }
}
