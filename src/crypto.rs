//! Authenticated encryption for sections (optional, per file flag `ENCRYPTED`).
//!
//! Key derivation: PBKDF2-HMAC-SHA256(password, salt, iterations) -> 32-byte key.
//! Encryption: AES-256-GCM, one independent call per section.
//!
//! # Per-section nonce derivation
//!
//! The format spec leaves the exact nonce scheme as an implementer's choice
//! (open question). This crate derives a deterministic 12-byte nonce per
//! section as `HMAC-SHA256(fileNonce, streamId || sectionOrdinal_u32_LE)[..12]`
//! rather than storing a fresh random nonce per section — the file header's
//! 12-byte `fileNonce` plus each section's already-serialized position
//! (stream id + its ordinal among encrypted sections) are enough to
//! reconstruct it on decode without persisting anything extra on disk.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use sha2::Sha256;
use thiserror::Error;

pub const GCM_TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;
pub const AUTH_VERIFY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed — wrong password or corrupted data")]
    DecryptionFailed,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Derive a 256-bit key via PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut key)
        .expect("pbkdf2 output length is fixed at 32 bytes");
    key
}

/// The `authVerify` tag stored in the encryption header: an HMAC over the
/// derived key itself, letting the reader reject a wrong password before
/// attempting to decrypt any section payload.
pub fn compute_auth_verify(key: &[u8; 32]) -> [u8; AUTH_VERIFY_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(b"gics-auth-verify-v1");
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; AUTH_VERIFY_LEN];
    out.copy_from_slice(&result);
    out
}

pub fn verify_password(key: &[u8; 32], stored_auth_verify: &[u8; AUTH_VERIFY_LEN]) -> bool {
    compute_auth_verify(key) == *stored_auth_verify
}

/// Deterministic per-section nonce: HMAC-SHA256(fileNonce, streamId || ordinal)[..12].
pub fn derive_section_nonce(file_nonce: &[u8; NONCE_LEN], stream_id: u8, section_ordinal: u32) -> [u8; NONCE_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(file_nonce).expect("HMAC accepts any key length");
    mac.update(&[stream_id]);
    mac.update(&section_ordinal.to_le_bytes());
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(&result[..NONCE_LEN]);
    out
}

/// Encrypt `plaintext` with AES-256-GCM under a derived per-section nonce.
/// `associated_data` binds the ciphertext to `fileHeaderBytes || streamId`.
/// Returns the ciphertext and the detached 16-byte GCM tag.
pub fn encrypt_section(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; GCM_TAG_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let payload = aes_gcm::aead::Payload {
        msg: plaintext,
        aad: associated_data,
    };
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let tag_offset = sealed.len() - GCM_TAG_LEN;
    let tag_bytes = sealed.split_off(tag_offset);
    let mut tag = [0u8; GCM_TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((sealed, tag))
}

pub fn decrypt_section(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    associated_data: &[u8],
    ciphertext: &[u8],
    tag: &[u8; GCM_TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let mut combined = Vec::with_capacity(ciphertext.len() + GCM_TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    let payload = aes_gcm::aead::Payload {
        msg: &combined,
        aad: associated_data,
    };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::DecryptionFailed)
}
