//! Content hashing for cache snapshots using blake3.
//!
//! A [`ContentHash`] is the first 128 bits of the blake3 digest of a
//! snapshot's text. It is derived state: the hash stored on an entry is the
//! one recorded when the snapshot was last confirmed against storage.

use std::fmt;

/// 128-bit content hash of a serialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 16]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Hashes snapshot text.
///
/// Deterministic: the same text always produces the same hash.
pub fn hash_snapshot(text: &str) -> ContentHash {
    let digest = blake3::hash(text.as_bytes());
    let mut truncated = [0u8; 16];
    truncated.copy_from_slice(&digest.as_bytes()[..16]);
    ContentHash(truncated)
}
