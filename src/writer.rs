//! The encoder: buffers pushed snapshots into segments and seals them.
//!
//! Mirrors the shape of the sibling archive format's writer — options are an
//! explicit struct, segments are fully materialized in memory before being
//! written out, so (unlike that writer) no `Seek`-and-patch step is needed:
//! every length a segment or file header needs is known before any byte of
//! it is emitted.

use std::collections::HashMap;
use std::io::Write;

use crate::codec::CodecId;
use crate::crypto::{self, NONCE_LEN, SALT_LEN};
use crate::error::{GicsError, Result};
use crate::file::{self, EncryptionHeader, FileEos, ENC_MODE_AES256_GCM, DIGEST_SHA256, FLAG_ENCRYPTED, FLAG_HAS_SCHEMA, KDF_PBKDF2};
use crate::hashchain::{HashChain, IntegrityMode};
use crate::schema::{CodecStrategy, FieldType, ItemIdType, SchemaProfile};
use crate::section::{self, SealedBlock, SectionCrypto};
use crate::segment::{SegmentFooter, SegmentHeader, SegmentIndex, ITEM_MAJOR_LAYOUT};
use crate::snapshot::{FieldValue, ItemKey, Snapshot};

pub const STREAM_TIME: u8 = 1;
pub const STREAM_SNAPSHOT_LEN: u8 = 2;
pub const STREAM_ITEM_ID: u8 = 3;
pub const STREAM_LEGACY_VALUE: u8 = 4;
pub const STREAM_LEGACY_QUANTITY: u8 = 5;
pub const STREAM_FIELD_BASE: u8 = 100;

pub const DEFAULT_SEGMENT_BYTE_LIMIT: usize = 1 << 20;
pub const DEFAULT_BLOCK_SIZE: usize = 1000;
const PBKDF2_ITERATIONS: u32 = 100_000;

fn field_stream_id(schema: &SchemaProfile, field_idx: usize) -> u8 {
    if schema.is_legacy() {
        if field_idx == 0 { STREAM_LEGACY_VALUE } else { STREAM_LEGACY_QUANTITY }
    } else {
        STREAM_FIELD_BASE + field_idx as u8
    }
}

#[derive(Clone)]
pub struct WriterOptions {
    pub schema: Option<SchemaProfile>,
    pub level: i32,
    pub segment_byte_limit: usize,
    pub block_size: usize,
    pub outer_codec_id: CodecId,
    pub password: Option<String>,
    pub integrity_mode: IntegrityMode,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            schema: None,
            level: 3,
            segment_byte_limit: DEFAULT_SEGMENT_BYTE_LIMIT,
            block_size: DEFAULT_BLOCK_SIZE,
            outer_codec_id: CodecId::Zstd,
            password: None,
            integrity_mode: IntegrityMode::Strict,
        }
    }
}

struct EncryptionState {
    key: [u8; 32],
    file_nonce: [u8; NONCE_LEN],
}

pub struct Writer<W: Write> {
    out: W,
    options: WriterOptions,
    schema: SchemaProfile,
    pending: Vec<Snapshot>,
    pending_size_estimate: usize,
    last_timestamp: Option<i64>,
    chain: HashChain,
    section_ordinal: u32,
    encryption: Option<EncryptionState>,
    fixed_header_bytes: Vec<u8>,
    header_written: bool,
    finished: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, options: WriterOptions) -> Result<Self> {
        let schema = options.schema.clone().unwrap_or_else(SchemaProfile::legacy);

        let mut flags = 0u32;
        if !schema.is_legacy() {
            flags |= FLAG_HAS_SCHEMA;
        }
        let encryption = if let Some(password) = &options.password {
            flags |= FLAG_ENCRYPTED;
            let salt = random_bytes::<SALT_LEN>();
            let key = crypto::derive_key(password, &salt, PBKDF2_ITERATIONS);
            let auth_verify = crypto::compute_auth_verify(&key);
            let file_nonce = random_bytes::<NONCE_LEN>();
            Some((
                EncryptionHeader {
                    enc_mode: ENC_MODE_AES256_GCM,
                    salt,
                    auth_verify,
                    kdf_id: KDF_PBKDF2,
                    iterations: PBKDF2_ITERATIONS,
                    digest_id: DIGEST_SHA256,
                    file_nonce,
                },
                EncryptionState { key, file_nonce },
            ))
        } else {
            None
        };

        let fixed_header_bytes = file::encode_fixed_header(file::CURRENT_VERSION, flags).to_vec();

        let mut writer = Self {
            out,
            options,
            schema,
            pending: Vec::new(),
            pending_size_estimate: 0,
            last_timestamp: None,
            chain: HashChain::new(),
            section_ordinal: 0,
            encryption: None,
            fixed_header_bytes: fixed_header_bytes.clone(),
            header_written: false,
            finished: false,
        };

        let mut header_bytes = fixed_header_bytes;
        if let Some((enc_header, enc_state)) = encryption {
            header_bytes.extend_from_slice(&enc_header.encode());
            writer.encryption = Some(enc_state);
        }
        if !writer.schema.is_legacy() {
            header_bytes.extend_from_slice(&file::encode_schema_section(&writer.schema, writer.options.level)?);
        }
        writer.out.write_all(&header_bytes)?;
        writer.header_written = true;
        Ok(writer)
    }

    fn validate_record(&self, key: &ItemKey, record: &[FieldValue]) -> Result<()> {
        match (self.schema.item_id_type, key) {
            (ItemIdType::Number, ItemKey::Number(_)) => {}
            (ItemIdType::String, ItemKey::String(_)) => {}
            _ => return Err(GicsError::SchemaViolation("item key type does not match schema's itemIdType".to_string())),
        }
        if record.len() != self.schema.fields.len() {
            return Err(GicsError::SchemaViolation(format!(
                "record has {} fields, schema declares {}",
                record.len(),
                self.schema.fields.len()
            )));
        }
        for (field, value) in self.schema.fields.iter().zip(record.iter()) {
            match (field.field_type, value) {
                (FieldType::Numeric, FieldValue::Number(_)) => {}
                (FieldType::Categorical, FieldValue::Category(s)) => {
                    if !field.enum_map.contains_key(s) {
                        return Err(GicsError::SchemaViolation(format!(
                            "unknown category {s:?} for field {:?}",
                            field.name
                        )));
                    }
                }
                (FieldType::Categorical, FieldValue::CategoryPassthrough(_)) => {}
                _ => {
                    return Err(GicsError::SchemaViolation(format!(
                        "value for field {:?} does not match its declared type",
                        field.name
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if snapshot.timestamp < last {
                return Err(GicsError::SchemaViolation(format!(
                    "timestamp {} is less than the previous {}",
                    snapshot.timestamp, last
                )));
            }
        }
        if !snapshot.keys_sorted_unique() {
            return Err(GicsError::SchemaViolation("snapshot item keys must be sorted and unique".to_string()));
        }
        for (key, record) in &snapshot.items {
            self.validate_record(key, record)?;
        }

        self.last_timestamp = Some(snapshot.timestamp);
        self.pending_size_estimate += estimate_snapshot_bytes(&snapshot);
        self.pending.push(snapshot);

        if self.pending_size_estimate >= self.options.segment_byte_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let snapshots = std::mem::take(&mut self.pending);
        self.pending_size_estimate = 0;
        let segment_bytes = self.seal_segment(&snapshots)?;
        self.out.write_all(&segment_bytes)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        let eos = FileEos { root_hash: self.chain.current() };
        self.out.write_all(&eos.encode())?;
        self.finished = true;
        Ok(self.out)
    }

    fn seal_segment(&mut self, snapshots: &[Snapshot]) -> Result<Vec<u8>> {
        let block_size = self.options.block_size;

        let time_values: Vec<i64> = snapshots.iter().map(|s| s.timestamp).collect();
        let snapshot_len_values: Vec<i64> = snapshots.iter().map(|s| s.items.len() as i64).collect();

        let (string_dict, dict_index) = build_string_dict(snapshots, self.schema.item_id_type);

        let item_major = detect_item_major(snapshots);
        let items_per_snapshot = uniform_item_count(snapshots);
        let order = ordering_pairs(snapshots, item_major.is_some());

        let item_id_values: Vec<i64> = order
            .iter()
            .map(|&(i, j)| key_to_int(&snapshots[i].items[j].0, &dict_index))
            .collect();

        let mut field_streams: Vec<Vec<i64>> = Vec::new();
        let mut field_is_numeric: Vec<bool> = Vec::new();
        let mut field_numeric_values: Vec<Vec<f64>> = Vec::new();
        for (fidx, field) in self.schema.fields.iter().enumerate() {
            let is_numeric = field.field_type == FieldType::Numeric;
            field_is_numeric.push(is_numeric);
            if is_numeric {
                let values: Vec<f64> = order
                    .iter()
                    .map(|&(i, j)| match &snapshots[i].items[j].1[fidx] {
                        FieldValue::Number(n) => *n,
                        _ => unreachable!("validated at push time"),
                    })
                    .collect();
                field_numeric_values.push(values);
                field_streams.push(Vec::new());
            } else {
                let values: Vec<i64> = order
                    .iter()
                    .map(|&(i, j)| match &snapshots[i].items[j].1[fidx] {
                        FieldValue::Category(s) => *field.enum_map.get(s).expect("validated at push time") as i64,
                        FieldValue::CategoryPassthrough(v) => *v,
                        _ => unreachable!("validated at push time"),
                    })
                    .collect();
                field_streams.push(values);
                field_numeric_values.push(Vec::new());
            }
        }

        let mut body = Vec::new();

        // TIME: DoD computed once across the whole segment, then split into
        // blocks so the codec trial operates on an already-differenced,
        // cross-block-continuous sequence (see crate::inner module docs).
        let time_dod = crate::inner::dod_encode(&time_values);
        let time_blocks = crate::perf::trial_int_blocks(&time_dod, block_size);
        body.extend_from_slice(&self.encode_section(STREAM_TIME, &time_blocks)?);

        let snapshot_len_blocks = crate::perf::trial_int_blocks(&snapshot_len_values, block_size);
        body.extend_from_slice(&self.encode_section(STREAM_SNAPSHOT_LEN, &snapshot_len_blocks)?);

        let item_id_blocks = crate::perf::trial_int_blocks(&item_id_values, block_size);
        body.extend_from_slice(&self.encode_section(STREAM_ITEM_ID, &item_id_blocks)?);

        for fidx in 0..self.schema.fields.len() {
            let stream_id = field_stream_id(&self.schema, fidx);
            let blocks = if field_is_numeric[fidx] {
                crate::perf::trial_float_blocks(&field_numeric_values[fidx], block_size)
            } else {
                crate::perf::trial_int_blocks(&field_streams[fidx], block_size)
            };
            body.extend_from_slice(&self.encode_section(stream_id, &blocks)?);
        }

        let unique_item_ids: Vec<i64> = {
            let mut v = item_id_values.clone();
            v.sort_unstable();
            v.dedup();
            v
        };
        let index = SegmentIndex::build(unique_item_ids, string_dict);
        let index_bytes = index.encode();

        let mut flags = 0u8;
        if item_major.is_some() {
            flags |= ITEM_MAJOR_LAYOUT;
        }
        let header = SegmentHeader {
            index_offset: (crate::segment::SEGMENT_HEADER_LEN + body.len()) as u32,
            total_length: (crate::segment::SEGMENT_HEADER_LEN + body.len() + index_bytes.len() + crate::segment::SEGMENT_FOOTER_LEN) as u32,
            flags,
            items_per_snapshot: items_per_snapshot.unwrap_or(0) as u16,
        };

        let mut pre_footer = Vec::with_capacity(header.encode().len() + body.len() + index_bytes.len());
        pre_footer.extend_from_slice(&header.encode());
        pre_footer.extend_from_slice(&body);
        pre_footer.extend_from_slice(&index_bytes);

        let footer = SegmentFooter { root_hash: self.chain.current(), crc32: crate::segment::segment_crc32(&pre_footer) };

        let mut out = pre_footer;
        out.extend_from_slice(&footer.encode());
        Ok(out)
    }

    fn encode_section(&mut self, stream_id: u8, blocks: &[SealedBlock]) -> Result<Vec<u8>> {
        let ordinal = self.section_ordinal;
        self.section_ordinal += 1;

        let aad_header = self.fixed_header_bytes.clone();
        let encryption = self.encryption.as_ref().map(|e| (e.key, e.file_nonce));
        let mut aad = aad_header;
        aad.push(stream_id);

        let crypto_ctx = encryption.as_ref().map(|(key, nonce)| SectionCrypto {
            key,
            file_nonce: nonce,
            associated_data: aad.as_slice(),
        });

        section::encode_section(stream_id, self.options.outer_codec_id, self.options.level, blocks, ordinal, &mut self.chain, crypto_ctx.as_ref())
    }
}

impl Writer<Vec<u8>> {
    /// Resumes an existing file for appending more segments: parses its
    /// header, strips its File EOS marker, primes the running hash chain
    /// from the last segment's footer `rootHash` (the zero state if the
    /// file has no segments yet), and primes the non-decreasing-timestamp
    /// check from the last recovered snapshot so the append boundary can't
    /// go backwards in time. The returned writer's `finish()` produces
    /// `existing bytes (minus EOS) ++ new segments ++ new EOS`.
    pub fn open_append(existing: &[u8], options: WriterOptions) -> Result<Self> {
        let header = file::parse_header(existing)?;
        let schema = header.schema.clone().unwrap_or_else(SchemaProfile::legacy);
        if let Some(requested) = &options.schema {
            if requested.id != schema.id {
                return Err(GicsError::SchemaViolation("append schema does not match the existing file's schema".to_string()));
            }
        }

        let reader = crate::reader::Reader::new(
            existing,
            crate::reader::ReaderOptions { integrity_mode: IntegrityMode::Strict, password: options.password.clone() },
        )?;
        let (spans, eos_offset) = reader.walk_segments()?;
        let remaining = existing.len() - eos_offset;
        if remaining != file::FILE_EOS_LEN {
            return Err(GicsError::IncompleteData("missing or misplaced File EOS marker".to_string()));
        }

        let chain_root = spans.last().map(|s| s.footer.root_hash).unwrap_or([0u8; 32]);
        let chain = HashChain::from_state(chain_root);

        let per_segment_sections = 3 + schema.fields.len() as u32;
        let section_ordinal = spans.len() as u32 * per_segment_sections;

        let last_timestamp = if let Some(last_span) = spans.last() {
            let base_ordinal = (spans.len() - 1) as u32 * per_segment_sections;
            reader.decode_segment_lenient(last_span, base_ordinal)?.last().map(|s| s.timestamp)
        } else {
            None
        };

        let encryption = if header.is_encrypted() {
            let password = options
                .password
                .as_deref()
                .ok_or_else(|| GicsError::Integrity("file is encrypted but no password was provided".to_string()))?;
            let enc = header.encryption.as_ref().expect("is_encrypted() implies an encryption header was parsed");
            let key = crypto::derive_key(password, &enc.salt, enc.iterations);
            if !crypto::verify_password(&key, &enc.auth_verify) {
                return Err(GicsError::Integrity("invalid password".to_string()));
            }
            Some(EncryptionState { key, file_nonce: enc.file_nonce })
        } else {
            None
        };

        let fixed_header_bytes = file::encode_fixed_header(header.version, header.flags).to_vec();
        let mut out = existing.to_vec();
        out.truncate(eos_offset);

        Ok(Self {
            out,
            options,
            schema,
            pending: Vec::new(),
            pending_size_estimate: 0,
            last_timestamp,
            chain,
            section_ordinal,
            encryption,
            fixed_header_bytes,
            header_written: true,
            finished: false,
        })
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut rng = aes_gcm::aead::OsRng;
    let mut buf = [0u8; N];
    rng.fill_bytes(&mut buf);
    buf
}

fn estimate_snapshot_bytes(snapshot: &Snapshot) -> usize {
    8 + snapshot.items.iter().map(|(_, r)| 8 + r.len() * 16).sum::<usize>()
}

/// Returns the uniform item count across all snapshots, or `None` if it varies.
fn uniform_item_count(snapshots: &[Snapshot]) -> Option<usize> {
    let first = snapshots.first()?.items.len();
    if snapshots.iter().all(|s| s.items.len() == first) {
        Some(first)
    } else {
        None
    }
}

/// Detects the item-major eligibility condition: every snapshot shares the
/// exact same (sorted) item-key set. Returns the shared sorted key list.
fn detect_item_major(snapshots: &[Snapshot]) -> Option<Vec<ItemKey>> {
    let first_keys: Vec<ItemKey> = snapshots.first()?.items.iter().map(|(k, _)| k.clone()).collect();
    if first_keys.is_empty() {
        return None;
    }
    for s in snapshots {
        let keys: Vec<ItemKey> = s.items.iter().map(|(k, _)| k.clone()).collect();
        if keys != first_keys {
            return None;
        }
    }
    Some(first_keys)
}

/// Produces `(snapshot_index, item_index_within_snapshot)` pairs in the
/// order the ITEM_ID and field streams should be laid out.
fn ordering_pairs(snapshots: &[Snapshot], item_major: bool) -> Vec<(usize, usize)> {
    if !item_major {
        let mut out = Vec::new();
        for (i, s) in snapshots.iter().enumerate() {
            for j in 0..s.items.len() {
                out.push((i, j));
            }
        }
        return out;
    }

    let shared_keys: Vec<ItemKey> = snapshots[0].items.iter().map(|(k, _)| k.clone()).collect();
    let mut out = Vec::with_capacity(shared_keys.len() * snapshots.len());
    for key in &shared_keys {
        for (i, s) in snapshots.iter().enumerate() {
            let j = s.items.iter().position(|(k, _)| k == key).expect("item-major precondition: identical key sets");
            out.push((i, j));
        }
    }
    out
}

fn build_string_dict(snapshots: &[Snapshot], item_id_type: ItemIdType) -> (Option<Vec<String>>, HashMap<String, i64>) {
    if item_id_type != ItemIdType::String {
        return (None, HashMap::new());
    }
    let mut dict = Vec::new();
    let mut index = HashMap::new();
    for s in snapshots {
        for (key, _) in &s.items {
            if let ItemKey::String(s) = key {
                if !index.contains_key(s) {
                    index.insert(s.clone(), dict.len() as i64);
                    dict.push(s.clone());
                }
            }
        }
    }
    (Some(dict), index)
}

fn key_to_int(key: &ItemKey, dict_index: &HashMap<String, i64>) -> i64 {
    match key {
        ItemKey::Number(n) => *n,
        ItemKey::String(s) => *dict_index.get(s).expect("string dict built from the same snapshots"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FieldValue, ItemKey, Snapshot};

    fn legacy_snapshot(ts: i64, items: &[(i64, f64, f64)]) -> Snapshot {
        let mut snap = Snapshot::new(ts);
        for &(id, price, qty) in items {
            snap.items.push((ItemKey::Number(id), vec![FieldValue::Number(price), FieldValue::Number(qty)]));
        }
        snap
    }

    #[test]
    fn single_snapshot_produces_expected_magic_and_version() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        w.push(legacy_snapshot(1000, &[(1, 100.0, 10.0)])).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(&bytes[0..5], &[0x47, 0x49, 0x43, 0x53, 0x03]);
    }

    #[test]
    fn rejects_decreasing_timestamp() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        w.push(legacy_snapshot(10, &[(1, 1.0, 1.0)])).unwrap();
        let err = w.push(legacy_snapshot(5, &[(1, 1.0, 1.0)])).unwrap_err();
        assert!(matches!(err, GicsError::SchemaViolation(_)));
    }

    #[test]
    fn rejects_unsorted_items() {
        let mut snap = Snapshot::new(1);
        snap.items.push((ItemKey::Number(5), vec![FieldValue::Number(1.0), FieldValue::Number(1.0)]));
        snap.items.push((ItemKey::Number(1), vec![FieldValue::Number(1.0), FieldValue::Number(1.0)]));
        let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        assert!(matches!(w.push(snap), Err(GicsError::SchemaViolation(_))));
    }

    #[test]
    fn item_major_detected_for_uniform_item_sets() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for t in 0..5i64 {
            let items: Vec<(i64, f64, f64)> = (0..20).map(|id| (id, (1000 + t * 20 + id) as f64, 1.0)).collect();
            w.push(legacy_snapshot(t, &items)).unwrap();
        }
        let bytes = w.finish().unwrap();
        let parsed = crate::file::parse_header(&bytes).unwrap();
        let header = SegmentHeader::decode(&bytes[parsed.body_offset..]).unwrap();
        assert!(header.is_item_major());
        assert_eq!(header.items_per_snapshot, 20);
    }

    #[test]
    fn append_continues_chain_and_rejects_earlier_timestamps() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for t in 0..10i64 {
            w.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0)])).unwrap();
        }
        let first = w.finish().unwrap();

        let mut appended = Writer::open_append(&first, WriterOptions::default()).unwrap();
        assert!(matches!(
            appended.push(legacy_snapshot(5, &[(1, 1.0, 1.0)])),
            Err(GicsError::SchemaViolation(_))
        ));
        for t in 10..20i64 {
            appended.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0)])).unwrap();
        }
        let combined = appended.finish().unwrap();
        assert!(combined.len() > first.len());

        let reader = crate::reader::Reader::new(&combined, crate::reader::ReaderOptions::default()).unwrap();
        let snaps = reader.get_all_snapshots().unwrap();
        assert_eq!(snaps.len(), 20);
        assert_eq!(snaps[19].timestamp, 19);
    }
}
