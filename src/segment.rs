//! Segment: header + stream sections + index + footer.
//!
//! ```text
//! SegmentHeader (14B): "SG" magic(2) + indexOffset u32 + totalLength u32
//!                       + flags u8 + reserved u8 + itemsPerSnapshot u16
//! sections[]            (see crate::section)
//! SegmentIndex          bloom + sorted item-id list + optional string dict
//! SegmentFooter (36B):  rootHash[32] + crc32 u32
//! ```
//!
//! `indexOffset`/`totalLength` are relative to the segment's own start.
//! `crc32` in the footer covers every byte from the segment start up to, but
//! not including, the footer itself.
//!
//! The index's sorted item-ID list has no self-delimiting length in the
//! distilled wire table — only "varint-delta-encoded sorted item-ID list"
//! is specified. We prefix it with a `u32 LE` item count (a length-framing
//! detail the format leaves to the implementer, same spirit as the string
//! dictionary's own `hasDict` + length framing that *is* spelled out).
//!
//! The `hasDict` flag byte is always present, even for numeric-keyed files
//! (where it is always `0`) — a one-byte tax in exchange for a decoder that
//! never has to branch on `itemIdType` to know whether to expect it. "No
//! extra bytes" in the distilled spec is read here as "no extra
//! *dictionary* bytes," not as "no framing byte at all."

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::bloom::BloomFilter;
use crate::error::{GicsError, Result};
use crate::varint::{read_varint, read_zigzag_varint, write_varint, write_zigzag_varint};

pub const SEGMENT_HEADER_LEN: usize = 14;
pub const SEGMENT_FOOTER_LEN: usize = 36;
pub const ITEM_MAJOR_LAYOUT: u8 = 0x01;

fn incomplete(what: &str) -> GicsError {
    GicsError::IncompleteData(format!("truncated {what}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub index_offset: u32,
    pub total_length: u32,
    pub flags: u8,
    pub items_per_snapshot: u16,
}

impl SegmentHeader {
    pub fn is_item_major(&self) -> bool {
        self.flags & ITEM_MAJOR_LAYOUT != 0
    }

    pub fn encode(&self) -> [u8; SEGMENT_HEADER_LEN] {
        let mut out = [0u8; SEGMENT_HEADER_LEN];
        out[0] = b'S';
        out[1] = b'G';
        out[2..6].copy_from_slice(&self.index_offset.to_le_bytes());
        out[6..10].copy_from_slice(&self.total_length.to_le_bytes());
        out[10] = self.flags;
        out[11] = 0; // reserved
        out[12..14].copy_from_slice(&self.items_per_snapshot.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SEGMENT_HEADER_LEN {
            return Err(incomplete("segment header"));
        }
        if &data[0..2] != b"SG" {
            return Err(GicsError::Integrity("bad segment magic".to_string()));
        }
        let index_offset = u32::from_le_bytes(data[2..6].try_into().unwrap());
        let total_length = u32::from_le_bytes(data[6..10].try_into().unwrap());
        let flags = data[10];
        let items_per_snapshot = u16::from_le_bytes(data[12..14].try_into().unwrap());
        Ok(Self { index_offset, total_length, flags, items_per_snapshot })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub bloom: Vec<u8>,
    /// Sorted, deduplicated item keys (as integers — string keys are already
    /// dictionary-mapped by the time they reach this struct).
    pub sorted_item_ids: Vec<i64>,
    pub string_dict: Option<Vec<String>>,
}

impl SegmentIndex {
    pub fn build(mut unique_item_ids: Vec<i64>, string_dict: Option<Vec<String>>) -> Self {
        unique_item_ids.sort_unstable();
        unique_item_ids.dedup();
        let bloom_size = BloomFilter::size_for_key_count(unique_item_ids.len());
        let mut bloom = BloomFilter::new(bloom_size);
        for &id in &unique_item_ids {
            bloom.insert(id);
        }
        Self { bloom: bloom.as_bytes().to_vec(), sorted_item_ids: unique_item_ids, string_dict }
    }

    pub fn maybe_contains(&self, key: i64) -> bool {
        if !BloomFilter::from_bytes(&self.bloom).maybe_contains(key) {
            return false;
        }
        self.sorted_item_ids.binary_search(&key).is_ok()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(self.bloom.len() as u16).unwrap();
        out.extend_from_slice(&self.bloom);

        out.write_u32::<LittleEndian>(self.sorted_item_ids.len() as u32).unwrap();
        let mut prev = 0i64;
        for &id in &self.sorted_item_ids {
            write_zigzag_varint(&mut out, id.wrapping_sub(prev));
            prev = id;
        }

        match &self.string_dict {
            Some(dict) => {
                out.push(1);
                let mut dict_bytes = Vec::new();
                write_varint(&mut dict_bytes, dict.len() as u64);
                for s in dict {
                    let bytes = s.as_bytes();
                    write_varint(&mut dict_bytes, bytes.len() as u64);
                    dict_bytes.extend_from_slice(bytes);
                }
                out.write_u32::<LittleEndian>(dict_bytes.len() as u32).unwrap();
                out.extend_from_slice(&dict_bytes);
            }
            None => out.push(0),
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let bloom_size = cursor.read_u16::<LittleEndian>().map_err(|_| incomplete("segment index bloom size"))? as usize;
        let mut bloom = vec![0u8; bloom_size];
        cursor.read_exact(&mut bloom).map_err(|_| incomplete("segment index bloom bytes"))?;

        let count = cursor.read_u32::<LittleEndian>().map_err(|_| incomplete("segment index item count"))? as usize;
        let pos_start = cursor.position() as usize;
        let buf = *cursor.get_ref();
        let mut pos = pos_start;
        let mut sorted_item_ids = Vec::with_capacity(count);
        let mut prev = 0i64;
        for _ in 0..count {
            let delta = read_zigzag_varint(buf, &mut pos).ok_or_else(|| incomplete("segment index item id"))?;
            prev = prev.wrapping_add(delta);
            sorted_item_ids.push(prev);
        }
        cursor.set_position(pos as u64);

        let has_dict = cursor.read_u8().map_err(|_| incomplete("segment index dict flag"))?;
        let string_dict = if has_dict == 1 {
            let dict_len = cursor.read_u32::<LittleEndian>().map_err(|_| incomplete("segment index dict length"))? as usize;
            let start = cursor.position() as usize;
            let buf = *cursor.get_ref();
            let end = start
                .checked_add(dict_len)
                .ok_or_else(|| GicsError::Integrity("segment index dictionary length overflow".to_string()))?;
            if end > buf.len() {
                return Err(incomplete("segment index string dictionary"));
            }
            let dict_bytes = &buf[start..end];
            let mut dpos = 0usize;
            let n = read_varint(dict_bytes, &mut dpos).ok_or_else(|| incomplete("string dictionary count"))? as usize;
            let mut dict = Vec::with_capacity(n);
            for _ in 0..n {
                let len = read_varint(dict_bytes, &mut dpos).ok_or_else(|| incomplete("string dictionary entry length"))? as usize;
                let s_end = dpos
                    .checked_add(len)
                    .filter(|&e| e <= dict_bytes.len())
                    .ok_or_else(|| incomplete("string dictionary entry bytes"))?;
                let s = String::from_utf8(dict_bytes[dpos..s_end].to_vec())
                    .map_err(|e| GicsError::Integrity(format!("string dictionary entry is not valid utf-8: {e}")))?;
                dict.push(s);
                dpos = s_end;
            }
            cursor.set_position((end) as u64);
            Some(dict)
        } else {
            None
        };

        Ok(Self { bloom, sorted_item_ids, string_dict })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    pub root_hash: [u8; 32],
    pub crc32: u32,
}

impl SegmentFooter {
    pub fn encode(&self) -> [u8; SEGMENT_FOOTER_LEN] {
        let mut out = [0u8; SEGMENT_FOOTER_LEN];
        out[0..32].copy_from_slice(&self.root_hash);
        out[32..36].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SEGMENT_FOOTER_LEN {
            return Err(incomplete("segment footer"));
        }
        let mut root_hash = [0u8; 32];
        root_hash.copy_from_slice(&data[0..32]);
        let crc32 = u32::from_le_bytes(data[32..36].try_into().unwrap());
        Ok(Self { root_hash, crc32 })
    }
}

/// Computes the CRC32 a segment footer should carry, over every byte from
/// the segment's start up to (not including) the footer.
pub fn segment_crc32(pre_footer_bytes: &[u8]) -> u32 {
    crc32fast::hash(pre_footer_bytes)
}

use std::io::Read as _;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = SegmentHeader { index_offset: 1234, total_length: 9999, flags: ITEM_MAJOR_LAYOUT, items_per_snapshot: 20 };
        let bytes = h.encode();
        assert_eq!(bytes.len(), SEGMENT_HEADER_LEN);
        let back = SegmentHeader::decode(&bytes).unwrap();
        assert_eq!(back, h);
        assert!(back.is_item_major());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = [0u8; SEGMENT_HEADER_LEN];
        bytes[0] = b'X';
        bytes[1] = b'X';
        assert!(matches!(SegmentHeader::decode(&bytes), Err(GicsError::Integrity(_))));
    }

    #[test]
    fn index_roundtrip_numeric_no_dict() {
        let idx = SegmentIndex::build(vec![50, 10, 30, 10, 20], None);
        assert_eq!(idx.sorted_item_ids, vec![10, 20, 30, 50]);
        let bytes = idx.encode();
        let back = SegmentIndex::decode(&bytes).unwrap();
        assert_eq!(back, idx);
        assert!(back.maybe_contains(30));
    }

    #[test]
    fn index_roundtrip_with_string_dict() {
        let dict = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()];
        let idx = SegmentIndex::build(vec![0, 1, 2], Some(dict.clone()));
        let bytes = idx.encode();
        let back = SegmentIndex::decode(&bytes).unwrap();
        assert_eq!(back.string_dict, Some(dict));
    }

    #[test]
    fn footer_roundtrip() {
        let f = SegmentFooter { root_hash: [7u8; 32], crc32: 0xDEADBEEF };
        let bytes = f.encode();
        assert_eq!(bytes.len(), SEGMENT_FOOTER_LEN);
        assert_eq!(SegmentFooter::decode(&bytes).unwrap(), f);
    }

    #[test]
    fn crc_changes_with_content() {
        let a = segment_crc32(b"hello");
        let b = segment_crc32(b"hellp");
        assert_ne!(a, b);
    }
}
