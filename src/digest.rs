//! Streaming SHA-256 digests over buffer and index spans.
//!
//! The writer feeds each encoded buffer through an engine while the bytes are
//! streamed to disk, so hashing never costs a second pass. The reader hashes
//! stored spans on demand and compares against the index.

use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest as stored in index entries and the trailer.
pub type Digest256 = [u8; 32];

/// Streaming SHA-256 engine.
#[derive(Default)]
pub struct DigestEngine {
    hasher: Sha256,
}

impl DigestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb the next span of bytes.
    pub fn update(&mut self, span: &[u8]) {
        self.hasher.update(span);
    }

    /// Consume the engine and produce the digest.
    pub fn finalize(self) -> Digest256 {
        self.hasher.finalize().into()
    }
}

/// One-shot digest of a contiguous span.
pub fn hash_bytes(span: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(span);
    hasher.finalize().into()
}
