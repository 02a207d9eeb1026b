//! Stream Section: one stream's contribution to one segment.
//!
//! Wire layout (order exact, all multi-byte integers little-endian):
//!
//! ```text
//! streamId        u8
//! outerCodecId    u8
//! blockCount      u16
//! uncompressedLen u32
//! compressedLen   u32
//! sectionHash     [u8;32]
//! authTag         [u8;16]   // present iff file is encrypted
//! manifest        blockCount x { innerCodecId u8, nItems u32, payloadLen u32, flags u8 }
//! payload         compressedLen bytes
//! ```
//!
//! `sectionHash` is the running hash-chain value after this section's
//! contribution (see [`crate::hashchain`]) is absorbed; the contribution
//! buffer is `streamId || blockCount_u16_LE || manifestBytes || payload`,
//! where `payload` is whatever actually sits on disk — the encrypted
//! ciphertext when the file is encrypted, the plain compressed bytes
//! otherwise. This mirrors `sixcy::block::encode_block`'s order of
//! operations: compress, then (optionally) encrypt, then hash what was
//! written.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

use crate::codec::{self, CodecId};
use crate::crypto::{self, GCM_TAG_LEN, NONCE_LEN};
use crate::error::{GicsError, Result};
use crate::hashchain::{HashChain, IntegrityMode};
use crate::inner::InnerCodecId;

/// Per-section decompression cap (spec'd resource limit).
pub const MAX_UNCOMPRESSED_SECTION_LEN: u64 = 64 * 1024 * 1024;

pub const QUARANTINE_FLAG: u8 = 0x10;
pub const ANOMALY_START_FLAG: u8 = 0x20;
pub const ANOMALY_END_FLAG: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockManifestEntry {
    pub inner_codec_id: u8,
    pub n_items: u32,
    pub payload_len: u32,
    pub flags: u8,
}

/// A block ready to be sealed into a section: its chosen inner codec, the
/// item count it represents, and its already-encoded byte payload.
#[derive(Debug, Clone)]
pub struct SealedBlock {
    pub inner_codec_id: InnerCodecId,
    pub n_items: u32,
    pub payload: Vec<u8>,
    pub flags: u8,
}

fn write_manifest(entries: &[BlockManifestEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 10);
    for e in entries {
        out.push(e.inner_codec_id);
        out.extend_from_slice(&e.n_items.to_le_bytes());
        out.extend_from_slice(&e.payload_len.to_le_bytes());
        out.push(e.flags);
    }
    out
}

fn read_manifest(cursor: &mut Cursor<&[u8]>, block_count: u16) -> Result<Vec<BlockManifestEntry>> {
    let mut entries = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let inner_codec_id = cursor.read_u8().map_err(incomplete)?;
        let n_items = cursor.read_u32::<LittleEndian>().map_err(incomplete)?;
        let payload_len = cursor.read_u32::<LittleEndian>().map_err(incomplete)?;
        let flags = cursor.read_u8().map_err(incomplete)?;
        entries.push(BlockManifestEntry { inner_codec_id, n_items, payload_len, flags });
    }
    Ok(entries)
}

fn incomplete(e: io::Error) -> GicsError {
    GicsError::IncompleteData(format!("truncated stream section: {e}"))
}

/// Key material and position needed to encrypt/decrypt one section.
pub struct SectionCrypto<'a> {
    pub key: &'a [u8; 32],
    pub file_nonce: &'a [u8; NONCE_LEN],
    pub associated_data: &'a [u8],
}

/// Encodes one stream's blocks into a complete Stream Section, absorbing its
/// contribution into `chain` and returning the serialized bytes.
#[allow(clippy::too_many_arguments)]
pub fn encode_section(
    stream_id: u8,
    outer_codec_id: CodecId,
    level: i32,
    blocks: &[SealedBlock],
    section_ordinal: u32,
    chain: &mut HashChain,
    crypto_ctx: Option<&SectionCrypto>,
) -> Result<Vec<u8>> {
    let block_count: u16 = blocks
        .len()
        .try_into()
        .map_err(|_| GicsError::LimitExceeded(format!("block count {} exceeds u16", blocks.len())))?;

    let manifest_entries: Vec<BlockManifestEntry> = blocks
        .iter()
        .map(|b| BlockManifestEntry {
            inner_codec_id: b.inner_codec_id as u8,
            n_items: b.n_items,
            payload_len: b.payload.len() as u32,
            flags: b.flags,
        })
        .collect();
    let manifest_bytes = write_manifest(&manifest_entries);

    let mut uncompressed = Vec::new();
    for b in blocks {
        uncompressed.extend_from_slice(&b.payload);
    }
    let uncompressed_len = uncompressed.len() as u32;

    let outer = codec::get_codec(outer_codec_id);
    let compressed = outer
        .compress(&uncompressed, level)
        .map_err(|e| GicsError::Integrity(format!("outer compression failed: {e}")))?;

    let (on_disk_payload, auth_tag): (Vec<u8>, Option<[u8; GCM_TAG_LEN]>) = match crypto_ctx {
        Some(ctx) => {
            let nonce = crypto::derive_section_nonce(ctx.file_nonce, stream_id, section_ordinal);
            let (ciphertext, tag) = crypto::encrypt_section(ctx.key, &nonce, ctx.associated_data, &compressed)
                .map_err(|e| GicsError::Integrity(format!("section encryption failed: {e}")))?;
            (ciphertext, Some(tag))
        }
        None => (compressed, None),
    };
    let compressed_len = on_disk_payload.len() as u32;

    let section_hash = chain.absorb(stream_id, block_count, &manifest_bytes, &on_disk_payload);

    let mut out = Vec::new();
    out.push(stream_id);
    out.push(outer_codec_id as u8);
    out.write_u16::<LittleEndian>(block_count).unwrap();
    out.write_u32::<LittleEndian>(uncompressed_len).unwrap();
    out.write_u32::<LittleEndian>(compressed_len).unwrap();
    out.extend_from_slice(&section_hash);
    if let Some(tag) = auth_tag {
        out.extend_from_slice(&tag);
    }
    out.extend_from_slice(&manifest_bytes);
    out.extend_from_slice(&on_disk_payload);
    Ok(out)
}

/// A fully parsed, integrity-checked, decrypted-and-decompressed section:
/// the manifest plus the flat uncompressed payload buffer, ready for the
/// caller to slice per block and run through [`crate::inner`].
pub struct DecodedSection {
    pub stream_id: u8,
    pub outer_codec_id: CodecId,
    pub manifest: Vec<BlockManifestEntry>,
    pub uncompressed: Vec<u8>,
}

/// Parses and verifies one Stream Section starting at `data`'s current
/// cursor position, advancing it past the section. `section_ordinal` and
/// `crypto_ctx` are only needed when the file is encrypted.
pub fn decode_section(
    cursor: &mut Cursor<&[u8]>,
    encrypted: bool,
    section_ordinal: u32,
    chain: &mut HashChain,
    mode: IntegrityMode,
    crypto_ctx: Option<&SectionCrypto>,
) -> Result<DecodedSection> {
    let stream_id = cursor.read_u8().map_err(incomplete)?;
    let outer_codec_id_raw = cursor.read_u8().map_err(incomplete)?;
    let block_count = cursor.read_u16::<LittleEndian>().map_err(incomplete)?;
    let uncompressed_len = cursor.read_u32::<LittleEndian>().map_err(incomplete)?;
    let compressed_len = cursor.read_u32::<LittleEndian>().map_err(incomplete)?;

    if uncompressed_len as u64 > MAX_UNCOMPRESSED_SECTION_LEN {
        return Err(GicsError::LimitExceeded(format!(
            "section {stream_id} declares uncompressedLen {uncompressed_len}, exceeding the {MAX_UNCOMPRESSED_SECTION_LEN}-byte cap"
        )));
    }

    let outer_codec_id = CodecId::from_u8(outer_codec_id_raw)
        .ok_or_else(|| GicsError::Integrity(format!("unrecognised outer codec id {outer_codec_id_raw}")))?;

    let mut section_hash = [0u8; 32];
    cursor.read_exact(&mut section_hash).map_err(incomplete)?;

    let auth_tag = if encrypted {
        let mut tag = [0u8; GCM_TAG_LEN];
        cursor.read_exact(&mut tag).map_err(incomplete)?;
        Some(tag)
    } else {
        None
    };

    let manifest = read_manifest(cursor, block_count)?;
    let manifest_bytes = write_manifest(&manifest);

    let payload_start = cursor.position() as usize;
    let payload_end = payload_start
        .checked_add(compressed_len as usize)
        .ok_or_else(|| GicsError::Integrity("section payload length overflow".to_string()))?;
    let buf = *cursor.get_ref();
    if payload_end > buf.len() {
        return Err(GicsError::IncompleteData(format!(
            "stream {stream_id} section payload extends {} bytes past end of buffer",
            payload_end - buf.len()
        )));
    }
    let on_disk_payload = &buf[payload_start..payload_end];
    cursor.set_position(payload_end as u64);

    let expected_hash = chain.absorb(stream_id, block_count, &manifest_bytes, on_disk_payload);
    crate::hashchain::verify(mode, &format!("stream {stream_id} section"), &section_hash, &expected_hash)?;

    let compressed = match (encrypted, crypto_ctx, auth_tag) {
        (true, Some(ctx), Some(tag)) => {
            let nonce = crypto::derive_section_nonce(ctx.file_nonce, stream_id, section_ordinal);
            crypto::decrypt_section(ctx.key, &nonce, ctx.associated_data, on_disk_payload, &tag)
                .map_err(|e| GicsError::Integrity(format!("section decryption failed: {e}")))?
        }
        (true, _, _) => return Err(GicsError::Integrity("encrypted file read without a password".to_string())),
        (false, _, _) => on_disk_payload.to_vec(),
    };

    let outer = codec::get_codec(outer_codec_id);
    let uncompressed = outer
        .decompress(&compressed)
        .map_err(|e| GicsError::Integrity(format!("outer decompression failed: {e}")))?;
    if uncompressed.len() as u32 != uncompressed_len {
        return Err(GicsError::Integrity(format!(
            "stream {stream_id} section decompressed to {} bytes, expected {uncompressed_len}",
            uncompressed.len()
        )));
    }

    Ok(DecodedSection { stream_id, outer_codec_id, manifest, uncompressed })
}

use std::io::Read as _;
