//! File-level framing: header, optional encryption header, optional schema
//! payload, and the trailing File EOS marker.
//!
//! ```text
//! magic(4="GICS") + version u8 + flags u32
//!   + [encryption header, iff flags & ENCRYPTED]
//!   + [u32 LE schema length + zstd(JSON(schema)), iff flags & HAS_SCHEMA]
//!   + segments+
//!   + FileEos (37B): 0xFF + rootHash[32] + padding
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::codec::{self, CodecId};
use crate::crypto::{AUTH_VERIFY_LEN, NONCE_LEN, SALT_LEN};
use crate::error::{GicsError, Result};
use crate::schema::SchemaProfile;

pub const MAGIC: [u8; 4] = *b"GICS";
pub const CURRENT_VERSION: u8 = 0x03;
pub const LEGACY_VERSION: u8 = 0x02;

pub const FLAG_ENCRYPTED: u32 = 0x0000_0001;
pub const FLAG_HAS_SCHEMA: u32 = 0x0000_0004;

pub const KDF_PBKDF2: u8 = 1;
pub const DIGEST_SHA256: u8 = 1;
pub const ENC_MODE_AES256_GCM: u8 = 1;

pub const FILE_EOS_LEN: usize = 37;

fn incomplete(what: &str) -> GicsError {
    GicsError::IncompleteData(format!("truncated {what}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub enc_mode: u8,
    pub salt: [u8; SALT_LEN],
    pub auth_verify: [u8; AUTH_VERIFY_LEN],
    pub kdf_id: u8,
    pub iterations: u32,
    pub digest_id: u8,
    pub file_nonce: [u8; NONCE_LEN],
}

impl EncryptionHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + SALT_LEN + AUTH_VERIFY_LEN + 1 + 4 + 1 + NONCE_LEN);
        out.push(self.enc_mode);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.auth_verify);
        out.push(self.kdf_id);
        out.extend_from_slice(&self.iterations.to_le_bytes());
        out.push(self.digest_id);
        out.extend_from_slice(&self.file_nonce);
        out
    }

    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let enc_mode = cursor.read_u8().map_err(|_| incomplete("encryption header"))?;
        let mut salt = [0u8; SALT_LEN];
        cursor.read_exact(&mut salt).map_err(|_| incomplete("encryption header salt"))?;
        let mut auth_verify = [0u8; AUTH_VERIFY_LEN];
        cursor.read_exact(&mut auth_verify).map_err(|_| incomplete("encryption header authVerify"))?;
        let kdf_id = cursor.read_u8().map_err(|_| incomplete("encryption header kdfId"))?;
        let iterations = cursor.read_u32::<LittleEndian>().map_err(|_| incomplete("encryption header iterations"))?;
        let digest_id = cursor.read_u8().map_err(|_| incomplete("encryption header digestId"))?;
        let mut file_nonce = [0u8; NONCE_LEN];
        cursor.read_exact(&mut file_nonce).map_err(|_| incomplete("encryption header fileNonce"))?;
        if enc_mode != ENC_MODE_AES256_GCM {
            return Err(GicsError::Integrity(format!("unsupported encryption mode {enc_mode}")));
        }
        if kdf_id != KDF_PBKDF2 {
            return Err(GicsError::Integrity(format!("unsupported kdf id {kdf_id}")));
        }
        if digest_id != DIGEST_SHA256 {
            return Err(GicsError::Integrity(format!("unsupported digest id {digest_id}")));
        }
        Ok(Self { enc_mode, salt, auth_verify, kdf_id, iterations, digest_id, file_nonce })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileHeader {
    pub version: u8,
    pub flags: u32,
    pub encryption: Option<EncryptionHeader>,
    pub schema: Option<SchemaProfile>,
    /// Byte offset (from file start) where the first segment begins.
    pub body_offset: usize,
}

impl ParsedFileHeader {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Serializes the fixed portion of the header (magic + version + flags);
/// used both to write the file and to compute `fileHeaderBytes` for AEAD
/// associated data.
pub fn encode_fixed_header(version: u8, flags: u32) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0..4].copy_from_slice(&MAGIC);
    out[4] = version;
    out[5..9].copy_from_slice(&flags.to_le_bytes());
    out
}

pub fn encode_schema_section(schema: &SchemaProfile, level: i32) -> Result<Vec<u8>> {
    let json = schema.to_json_bytes();
    let compressed = codec::get_codec(CodecId::Zstd)
        .compress(&json, level)
        .map_err(|e| GicsError::Integrity(format!("schema section compression failed: {e}")))?;
    let mut out = Vec::with_capacity(4 + compressed.len());
    out.write_u32::<LittleEndian>(compressed.len() as u32).unwrap();
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Parses the file header: magic, version, flags, and the optional
/// encryption/schema sections that follow. Does not touch any segment.
pub fn parse_header(data: &[u8]) -> Result<ParsedFileHeader> {
    if data.len() < 9 {
        return Err(incomplete("file header"));
    }
    if data[0..4] != MAGIC {
        return Err(GicsError::Integrity("bad file magic".to_string()));
    }
    let version = data[4];
    if version == LEGACY_VERSION {
        return Err(GicsError::VersionMismatch(
            "version 0x02 (legacy) is not supported for decode in this build".to_string(),
        ));
    }
    if version != CURRENT_VERSION {
        return Err(GicsError::VersionMismatch(format!("unsupported version byte {version:#04x}")));
    }
    let flags = u32::from_le_bytes(data[5..9].try_into().unwrap());

    let mut cursor = Cursor::new(&data[9..]);
    let encryption = if flags & FLAG_ENCRYPTED != 0 {
        Some(EncryptionHeader::decode(&mut cursor)?)
    } else {
        None
    };

    let schema = if flags & FLAG_HAS_SCHEMA != 0 {
        let len = cursor.read_u32::<LittleEndian>().map_err(|_| incomplete("schema section length"))? as usize;
        let start = cursor.position() as usize;
        let buf = *cursor.get_ref();
        let end = start
            .checked_add(len)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| incomplete("schema section payload"))?;
        let compressed = &buf[start..end];
        let json = codec::get_codec(CodecId::Zstd)
            .decompress(compressed)
            .map_err(|e| GicsError::Integrity(format!("schema section decompression failed: {e}")))?;
        cursor.set_position(end as u64);
        Some(SchemaProfile::from_json_bytes(&json)?)
    } else {
        None
    };

    let body_offset = 9 + cursor.position() as usize;
    Ok(ParsedFileHeader { version, flags, encryption, schema, body_offset })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEos {
    pub root_hash: [u8; 32],
}

impl FileEos {
    pub fn encode(&self) -> [u8; FILE_EOS_LEN] {
        let mut out = [0u8; FILE_EOS_LEN];
        out[0] = 0xFF;
        out[1..33].copy_from_slice(&self.root_hash);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_EOS_LEN {
            return Err(incomplete("file EOS marker"));
        }
        if data[0] != 0xFF {
            return Err(GicsError::Integrity("missing file EOS marker".to_string()));
        }
        let mut root_hash = [0u8; 32];
        root_hash.copy_from_slice(&data[1..33]);
        Ok(Self { root_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaProfile;

    #[test]
    fn plain_header_roundtrip() {
        let mut bytes = encode_fixed_header(CURRENT_VERSION, 0).to_vec();
        bytes.extend_from_slice(&[1, 2, 3]); // stand-in segment bytes
        let parsed = parse_header(&bytes).unwrap();
        assert_eq!(parsed.version, CURRENT_VERSION);
        assert!(!parsed.is_encrypted());
        assert!(parsed.schema.is_none());
        assert_eq!(parsed.body_offset, 9);
    }

    #[test]
    fn header_with_schema_roundtrip() {
        let schema = SchemaProfile::legacy();
        let schema_section = encode_schema_section(&schema, 3).unwrap();
        let mut bytes = encode_fixed_header(CURRENT_VERSION, FLAG_HAS_SCHEMA).to_vec();
        bytes.extend_from_slice(&schema_section);
        let parsed = parse_header(&bytes).unwrap();
        assert!(parsed.schema.unwrap().is_legacy());
    }

    #[test]
    fn header_with_encryption_roundtrip() {
        let enc = EncryptionHeader {
            enc_mode: ENC_MODE_AES256_GCM,
            salt: [1u8; SALT_LEN],
            auth_verify: [2u8; AUTH_VERIFY_LEN],
            kdf_id: KDF_PBKDF2,
            iterations: 100_000,
            digest_id: DIGEST_SHA256,
            file_nonce: [3u8; NONCE_LEN],
        };
        let mut bytes = encode_fixed_header(CURRENT_VERSION, FLAG_ENCRYPTED).to_vec();
        bytes.extend_from_slice(&enc.encode());
        let parsed = parse_header(&bytes).unwrap();
        assert!(parsed.is_encrypted());
        assert_eq!(parsed.encryption.unwrap(), enc);
    }

    #[test]
    fn bad_magic_rejected() {
        let bytes = b"XXXX\x03\x00\x00\x00\x00".to_vec();
        assert!(matches!(parse_header(&bytes), Err(GicsError::Integrity(_))));
    }

    #[test]
    fn legacy_version_rejected_cleanly() {
        let bytes = b"GICS\x02\x00\x00\x00\x00".to_vec();
        assert!(matches!(parse_header(&bytes), Err(GicsError::VersionMismatch(_))));
    }

    #[test]
    fn future_version_rejected() {
        let bytes = b"GICS\x04\x00\x00\x00\x00".to_vec();
        assert!(matches!(parse_header(&bytes), Err(GicsError::VersionMismatch(_))));
    }

    #[test]
    fn file_eos_roundtrip() {
        let eos = FileEos { root_hash: [9u8; 32] };
        let bytes = eos.encode();
        assert_eq!(bytes.len(), FILE_EOS_LEN);
        assert_eq!(FileEos::decode(&bytes).unwrap(), eos);
    }

    #[test]
    fn file_eos_missing_marker_rejected() {
        let mut bytes = FileEos { root_hash: [0u8; 32] }.encode();
        bytes[0] = 0x00;
        assert!(matches!(FileEos::decode(&bytes), Err(GicsError::Integrity(_))));
    }
}
