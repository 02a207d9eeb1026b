//! Inner (numeric) codecs and the per-block trial-and-measure dispatcher.
//!
//! Every stream block is a run of logical values. Integer-shaped streams
//! (TIME, SNAPSHOT_LEN, ITEM_ID, categorical-as-int, structural numerics)
//! are carried natively as `i64`. "Value" numeric fields are carried as
//! `f64` because they must round-trip IEEE-754 bit patterns exactly
//! (NaN, +-Inf, -0) per the float edge-case scenario — when every value in
//! a block happens to be an exact, in-range integer we still take the
//! faster integer pipelines; otherwise [`InnerCodecId::Fixed64Le`] is the
//! safety floor that always works.
//!
//! This module contains no I/O; it is pure `&[T] -> Vec<u8>` transforms, the
//! same shape as `perf::rle_encode`/`rle_decode` in the byte-oriented sibling
//! archive format this crate is descended from.

use crate::varint::{read_varint, read_zigzag_varint, write_varint, write_zigzag_varint, zigzag_decode, zigzag_encode};

/// Candidate inner codec identities. The on-disk byte is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InnerCodecId {
    VarintDelta = 0,
    BitPackDelta = 1,
    RleZigZag = 2,
    DictVarint = 3,
    DodVarint = 4,
    RleDod = 5,
    Fixed64Le = 6,
}

impl InnerCodecId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::VarintDelta),
            1 => Some(Self::BitPackDelta),
            2 => Some(Self::RleZigZag),
            3 => Some(Self::DictVarint),
            4 => Some(Self::DodVarint),
            5 => Some(Self::RleDod),
            6 => Some(Self::Fixed64Le),
            _ => None,
        }
    }
}

/// Bounded dictionary size; beyond this the dictionary codec is not trialled
/// for the block (mirrors the spec's "bounded at some implementation limit").
pub const DICT_LIMIT: usize = 4096;

// ── Delta / Delta-of-Delta transforms ───────────────────────────────────────

pub fn delta_encode(values: &[i64]) -> Vec<i64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    for w in values.windows(2) {
        out.push(w[1].wrapping_sub(w[0]));
    }
    out
}

pub fn delta_decode(deltas: &[i64]) -> Vec<i64> {
    if deltas.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(deltas.len());
    let mut acc = deltas[0];
    out.push(acc);
    for &d in &deltas[1..] {
        acc = acc.wrapping_add(d);
        out.push(acc);
    }
    out
}

pub fn dod_encode(values: &[i64]) -> Vec<i64> {
    if values.is_empty() {
        return Vec::new();
    }
    if values.len() == 1 {
        return vec![values[0]];
    }
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    out.push(values[1].wrapping_sub(values[0]));
    let mut last_delta = values[1].wrapping_sub(values[0]);
    for w in values.windows(2).skip(1) {
        let delta = w[1].wrapping_sub(w[0]);
        out.push(delta.wrapping_sub(last_delta));
        last_delta = delta;
    }
    out
}

pub fn dod_decode(dods: &[i64]) -> Vec<i64> {
    if dods.is_empty() {
        return Vec::new();
    }
    if dods.len() == 1 {
        return vec![dods[0]];
    }
    let mut out = Vec::with_capacity(dods.len());
    out.push(dods[0]);
    let mut last_delta = dods[1];
    out.push(dods[0].wrapping_add(last_delta));
    for &dd in &dods[2..] {
        last_delta = last_delta.wrapping_add(dd);
        let next = *out.last().unwrap();
        out.push(next.wrapping_add(last_delta));
    }
    out
}

// ── Plain zig-zag varint ────────────────────────────────────────────────────

pub fn varint_encode(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for &v in values {
        write_zigzag_varint(&mut out, v);
    }
    out
}

pub fn varint_decode(data: &[u8], n_items: usize) -> Option<Vec<i64>> {
    let mut out = Vec::with_capacity(n_items);
    let mut pos = 0;
    for _ in 0..n_items {
        out.push(read_zigzag_varint(data, &mut pos)?);
    }
    Some(out)
}

// ── Run-length (zig-zag) ────────────────────────────────────────────────────

pub fn rle_encode_zigzag(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < values.len() {
        let v = values[i];
        let mut run = 1usize;
        while i + run < values.len() && values[i + run] == v && run < 255 {
            run += 1;
        }
        write_varint(&mut out, run as u64);
        write_zigzag_varint(&mut out, v);
        i += run;
    }
    out
}

pub fn rle_decode_zigzag(data: &[u8], n_items: usize) -> Option<Vec<i64>> {
    let mut out = Vec::with_capacity(n_items);
    let mut pos = 0;
    while out.len() < n_items {
        let run = read_varint(data, &mut pos)? as usize;
        let v = read_zigzag_varint(data, &mut pos)?;
        for _ in 0..run {
            out.push(v);
        }
    }
    Some(out)
}

// ── Bit-pack ─────────────────────────────────────────────────────────────────

fn bit_width(max_unsigned: u64) -> u8 {
    if max_unsigned == 0 {
        1
    } else {
        (64 - max_unsigned.leading_zeros()).max(1) as u8
    }
}

pub fn bitpack_encode(values: &[i64]) -> Vec<u8> {
    let zz: Vec<u64> = values.iter().map(|&v| zigzag_encode(v)).collect();
    let max = zz.iter().copied().max().unwrap_or(0);
    let w = bit_width(max);

    let mut out = Vec::with_capacity(1 + (values.len() * w as usize + 7) / 8);
    out.push(w);

    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;
    for &v in &zz {
        acc |= v << acc_bits;
        acc_bits += w as u32;
        while acc_bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            acc_bits -= 8;
        }
    }
    if acc_bits > 0 {
        out.push((acc & 0xff) as u8);
    }
    out
}

pub fn bitpack_decode(data: &[u8], n_items: usize) -> Option<Vec<i64>> {
    let &w = data.first()?;
    let w = w as u32;
    if w == 0 || w > 64 {
        return None;
    }
    let bits = &data[1..];

    let mut out = Vec::with_capacity(n_items);
    let mut bit_pos: usize = 0;
    for _ in 0..n_items {
        let mut acc: u64 = 0;
        let mut got: u32 = 0;
        while got < w {
            let byte_idx = bit_pos / 8;
            let bit_off = (bit_pos % 8) as u32;
            let byte = *bits.get(byte_idx)? as u64;
            let take = (8 - bit_off).min(w - got);
            let mask = (1u64 << take) - 1;
            let chunk = (byte >> bit_off) & mask;
            acc |= chunk << got;
            got += take;
            bit_pos += take as usize;
        }
        out.push(zigzag_decode(acc));
    }
    Some(out)
}

// ── Dictionary + varint ─────────────────────────────────────────────────────

pub fn dict_encode(values: &[i64], limit: usize) -> Option<Vec<u8>> {
    let mut dict: Vec<i64> = Vec::new();
    let mut index: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    let mut out = Vec::new();

    for &v in values {
        if let Some(&i) = index.get(&v) {
            write_varint(&mut out, (i as u64) * 2 + 1);
        } else {
            if dict.len() >= limit {
                return None; // dictionary explosion — caller skips this codec
            }
            write_varint(&mut out, zigzag_encode(v) * 2);
            index.insert(v, dict.len());
            dict.push(v);
        }
    }
    Some(out)
}

pub fn dict_decode(data: &[u8], n_items: usize) -> Option<Vec<i64>> {
    let mut dict: Vec<i64> = Vec::new();
    let mut out = Vec::with_capacity(n_items);
    let mut pos = 0;
    for _ in 0..n_items {
        let code = read_varint(data, &mut pos)?;
        if code & 1 == 1 {
            let idx = (code >> 1) as usize;
            let v = *dict.get(idx)?;
            out.push(v);
        } else {
            let v = zigzag_decode(code >> 1);
            dict.push(v);
            out.push(v);
        }
    }
    Some(out)
}

// ── Fixed64-LE safety floor ──────────────────────────────────────────────────

pub fn fixed64_encode(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn fixed64_decode(data: &[u8], n_items: usize) -> Option<Vec<f64>> {
    if data.len() < n_items * 8 {
        return None;
    }
    let mut out = Vec::with_capacity(n_items);
    for i in 0..n_items {
        let bytes: [u8; 8] = data[i * 8..i * 8 + 8].try_into().ok()?;
        out.push(f64::from_le_bytes(bytes));
    }
    Some(out)
}

// ── Composite integer codecs (what's actually trialled) ─────────────────────

fn encode_variant(id: InnerCodecId, values: &[i64]) -> Option<Vec<u8>> {
    match id {
        InnerCodecId::VarintDelta => Some(varint_encode(&delta_encode(values))),
        InnerCodecId::BitPackDelta => Some(bitpack_encode(&delta_encode(values))),
        InnerCodecId::RleZigZag => Some(rle_encode_zigzag(values)),
        InnerCodecId::DictVarint => dict_encode(values, DICT_LIMIT),
        InnerCodecId::DodVarint => Some(varint_encode(&dod_encode(values))),
        InnerCodecId::RleDod => Some(rle_encode_zigzag(&dod_encode(values))),
        InnerCodecId::Fixed64Le => None, // handled separately on the f64 path
    }
}

/// Decode a block's payload back to `i64` values given the codec that wrote it.
pub fn decode_int(id: InnerCodecId, data: &[u8], n_items: usize) -> Option<Vec<i64>> {
    match id {
        InnerCodecId::VarintDelta => Some(delta_decode(&varint_decode(data, n_items)?)),
        InnerCodecId::BitPackDelta => Some(delta_decode(&bitpack_decode(data, n_items)?)),
        InnerCodecId::RleZigZag => rle_decode_zigzag(data, n_items),
        InnerCodecId::DictVarint => dict_decode(data, n_items),
        InnerCodecId::DodVarint => Some(dod_decode(&varint_decode(data, n_items)?)),
        InnerCodecId::RleDod => Some(dod_decode(&rle_decode_zigzag(data, n_items)?)),
        InnerCodecId::Fixed64Le => None,
    }
}

const INT_CANDIDATES: [InnerCodecId; 6] = [
    InnerCodecId::VarintDelta,
    InnerCodecId::BitPackDelta,
    InnerCodecId::RleZigZag,
    InnerCodecId::DictVarint,
    InnerCodecId::DodVarint,
    InnerCodecId::RleDod,
];

/// Trial every integer candidate codec and return the smallest payload.
/// Used directly for streams that are always integral (TIME, SNAPSHOT_LEN,
/// ITEM_ID, categorical-as-int).
pub fn trial_best_int(values: &[i64]) -> (InnerCodecId, Vec<u8>) {
    let mut best: Option<(InnerCodecId, Vec<u8>)> = None;
    for &id in &INT_CANDIDATES {
        if let Some(payload) = encode_variant(id, values) {
            if best.as_ref().map(|(_, b)| payload.len() < b.len()).unwrap_or(true) {
                best = Some((id, payload));
            }
        }
    }
    // VarintDelta always succeeds, so `best` is never `None` here.
    best.expect("VarintDelta is always a valid candidate")
}

/// Returns `Some(i64)` if `v` round-trips exactly through `i64`.
fn exact_i64(v: f64) -> Option<i64> {
    if !v.is_finite() {
        return None;
    }
    if v.fract() != 0.0 {
        return None;
    }
    if v < -(1i64 << 53) as f64 || v > (1i64 << 53) as f64 {
        return None;
    }
    let i = v as i64;
    if i as f64 == v {
        Some(i)
    } else {
        None
    }
}

/// Trial every candidate over a value-typed (`f64`) block. When every value
/// in the block is an exact, finite, in-range integer (including `-0.0`,
/// which converts to integer `0` and is handled as `Fixed64Le` instead — see
/// below), the integer pipelines are trialled alongside `Fixed64Le` and the
/// smallest wins. Otherwise `Fixed64Le` is the only candidate.
pub fn trial_best_float(values: &[f64]) -> (InnerCodecId, Vec<u8>) {
    let has_negative_zero = values.iter().any(|v| *v == 0.0 && v.is_sign_negative());
    let all_exact: Option<Vec<i64>> = if has_negative_zero {
        None
    } else {
        values.iter().map(|&v| exact_i64(v)).collect()
    };

    let fixed = fixed64_encode(values);

    match all_exact {
        Some(ints) => {
            let (int_id, int_payload) = trial_best_int(&ints);
            if int_payload.len() < fixed.len() {
                (int_id, int_payload)
            } else {
                (InnerCodecId::Fixed64Le, fixed)
            }
        }
        None => (InnerCodecId::Fixed64Le, fixed),
    }
}

/// Decode a block's payload back to `f64` values.
pub fn decode_float(id: InnerCodecId, data: &[u8], n_items: usize) -> Option<Vec<f64>> {
    if id == InnerCodecId::Fixed64Le {
        return fixed64_decode(data, n_items);
    }
    decode_int(id, data, n_items).map(|ints| ints.into_iter().map(|i| i as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_roundtrip() {
        let v = vec![10i64, 12, 11, 20, -5];
        assert_eq!(delta_decode(&delta_encode(&v)), v);
    }

    #[test]
    fn dod_roundtrip() {
        for v in [
            vec![1i64, 2, 3, 4, 5],
            vec![100i64],
            vec![100i64, 105],
            vec![],
            vec![5i64, 5, 5, 5],
        ] {
            assert_eq!(dod_decode(&dod_encode(&v)), v);
        }
    }

    #[test]
    fn bitpack_roundtrip() {
        let v = vec![0i64, 1, -1, 500, -500, 1_000_000];
        let enc = bitpack_encode(&v);
        assert_eq!(bitpack_decode(&enc, v.len()).unwrap(), v);
    }

    #[test]
    fn rle_roundtrip() {
        let v = vec![5i64, 5, 5, 5, 6, 6, -1, -1, -1];
        let enc = rle_encode_zigzag(&v);
        assert_eq!(rle_decode_zigzag(&enc, v.len()).unwrap(), v);
    }

    #[test]
    fn dict_roundtrip() {
        let v = vec![7i64, 8, 7, 9, 8, 7];
        let enc = dict_encode(&v, DICT_LIMIT).unwrap();
        assert_eq!(dict_decode(&enc, v.len()).unwrap(), v);
    }

    #[test]
    fn dict_explosion_returns_none() {
        let v: Vec<i64> = (0..10).collect();
        assert!(dict_encode(&v, 4).is_none());
    }

    #[test]
    fn fixed64_roundtrip_float_specials() {
        let v = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, f64::MAX, f64::MIN_POSITIVE];
        let enc = fixed64_encode(&v);
        let dec = fixed64_decode(&enc, v.len()).unwrap();
        for (a, b) in v.iter().zip(dec.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn trial_best_int_picks_smallest() {
        let trending: Vec<i64> = (0..1000).map(|i| 1000 + i).collect();
        let (id, payload) = trial_best_int(&trending);
        assert!(payload.len() < trending.len() * 8);
        assert_ne!(id, InnerCodecId::Fixed64Le);
        let decoded = decode_int(id, &payload, trending.len()).unwrap();
        assert_eq!(decoded, trending);
    }

    #[test]
    fn trial_best_float_negative_zero_uses_fixed64() {
        let v = vec![-0.0, 1.0, 2.0];
        let (id, payload) = trial_best_float(&v);
        assert_eq!(id, InnerCodecId::Fixed64Le);
        let dec = decode_float(id, &payload, v.len()).unwrap();
        assert!(dec[0].is_sign_negative() && dec[0] == 0.0);
    }

    #[test]
    fn trial_best_float_exact_ints_uses_int_path() {
        let v: Vec<f64> = (0..500).map(|i| (1000 + i) as f64).collect();
        let (id, payload) = trial_best_float(&v);
        assert_ne!(id, InnerCodecId::Fixed64Le);
        let dec = decode_float(id, &payload, v.len()).unwrap();
        assert_eq!(dec, v);
    }
}
