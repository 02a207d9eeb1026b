//! The file-wide integrity hash chain.
//!
//! A running 32-byte state, initialized to all zeros, absorbs one section's
//! contribution at a time: `state = SHA256(state || streamId_u8 ||
//! blockCount_u16_LE || manifestBytes || compressedPayload)`. The state after
//! a segment's last section is that segment's footer `rootHash`; the state
//! after the file's last segment is the File EOS `rootHash`.
//!
//! `strict` mode treats any mismatch as fatal; `warn` mode logs and
//! continues — CRC32 checks are never downgraded by either mode.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityMode {
    Strict,
    Warn,
}

#[derive(Debug, Clone)]
pub struct HashChain {
    state: [u8; 32],
}

impl Default for HashChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HashChain {
    pub fn new() -> Self {
        Self { state: [0u8; 32] }
    }

    /// Resumes a chain from a previously-recorded state — the last
    /// segment's footer `rootHash` when appending to an existing file.
    pub fn from_state(state: [u8; 32]) -> Self {
        Self { state }
    }

    /// Absorbs one section's contribution, returning the new state (also the
    /// section's recorded `sectionHash`).
    pub fn absorb(&mut self, stream_id: u8, block_count: u16, manifest_bytes: &[u8], compressed_payload: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.state);
        hasher.update([stream_id]);
        hasher.update(block_count.to_le_bytes());
        hasher.update(manifest_bytes);
        hasher.update(compressed_payload);
        let digest = hasher.finalize();
        self.state.copy_from_slice(&digest);
        self.state
    }

    pub fn current(&self) -> [u8; 32] {
        self.state
    }
}

/// Verifies an expected hash against an actual one under the given mode.
/// Returns `Ok(())` if it matches, or if it mismatches under `Warn` mode
/// (after logging a warning). Returns `Err` only under `Strict` mismatch.
pub fn verify(mode: IntegrityMode, context: &str, expected: &[u8; 32], actual: &[u8; 32]) -> Result<(), crate::error::GicsError> {
    if expected == actual {
        return Ok(());
    }
    match mode {
        IntegrityMode::Strict => Err(crate::error::GicsError::Integrity(format!(
            "hash-chain mismatch at {context}: expected {}, got {}",
            hex::encode(expected),
            hex::encode(actual),
        ))),
        IntegrityMode::Warn => {
            log::warn!(
                "hash-chain mismatch at {context} (warn mode, continuing): expected {}, got {}",
                hex::encode(expected),
                hex::encode(actual),
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_deterministic() {
        let mut a = HashChain::new();
        let mut b = HashChain::new();
        let h1 = a.absorb(1, 2, b"manifest", b"payload");
        let h2 = b.absorb(1, 2, b"manifest", b"payload");
        assert_eq!(h1, h2);
    }

    #[test]
    fn chain_reacts_to_order() {
        let mut a = HashChain::new();
        a.absorb(1, 1, b"m1", b"p1");
        let after_first = a.absorb(2, 1, b"m2", b"p2");

        let mut b = HashChain::new();
        b.absorb(2, 1, b"m2", b"p2");
        let different_order = b.absorb(1, 1, b"m1", b"p1");

        assert_ne!(after_first, different_order);
    }

    #[test]
    fn warn_mode_swallows_mismatch() {
        let expected = [1u8; 32];
        let actual = [2u8; 32];
        assert!(verify(IntegrityMode::Warn, "test", &expected, &actual).is_ok());
        assert!(verify(IntegrityMode::Strict, "test", &expected, &actual).is_err());
    }
}
