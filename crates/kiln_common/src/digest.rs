//! Content digests for cache invalidation.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 20-byte content digest used to detect changed cache inputs.
///
/// Two inputs with the same `Digest` are assumed identical. The cache
/// stores one digest per dependency (runtime libraries and source
/// modules) and invalidates a cached artifact when any digest differs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 20]);

impl Digest {
    /// Number of bytes in a digest.
    pub const LEN: usize = 20;

    /// Computes a digest from a byte slice.
    ///
    /// The digest is the first 20 bytes of the SHA-256 hash of the input.
    pub fn of_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(&hash[..Self::LEN]);
        Self(out)
    }

    /// Wraps a raw 20-byte digest produced elsewhere.
    pub const fn from_raw(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = Digest::of_bytes(b"kernel.rs source");
        let b = Digest::of_bytes(b"kernel.rs source");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = Digest::of_bytes(b"one");
        let b = Digest::of_bytes(b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn raw_roundtrip() {
        let raw = [7u8; 20];
        let d = Digest::from_raw(raw);
        assert_eq!(d.as_bytes(), &raw);
    }

    #[test]
    fn display_format() {
        let d = Digest::of_bytes(b"fmt");
        let s = format!("{d}");
        assert_eq!(s.len(), 40, "Display should be 40 hex chars");
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn debug_abbreviated() {
        let d = Digest::of_bytes(b"dbg");
        let s = format!("{d:?}");
        assert!(s.starts_with("Digest("));
        assert!(s.ends_with(")"));
    }
}
