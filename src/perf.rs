//! Parallel block-trial fan-out for segment sealing.
//!
//! [`trial_int_blocks`]/[`trial_float_blocks`] split a stream's flat value
//! array into blocks and run the per-block inner-codec trial (see
//! [`crate::inner`]) over them. With the `parallel` feature enabled, the
//! trials for one stream's blocks run concurrently via Rayon — each block is
//! independent (the DoD/delta differencing already happened before
//! chunking, see `crate::writer::seal_segment`), so this mirrors the
//! sibling archive format's chunk-parallel compression: one task per
//! independent chunk, sequential fallback when the feature is off.

use crate::inner::{trial_best_float, trial_best_int};
use crate::section::{SealedBlock, QUARANTINE_FLAG};

/// A trialled block is flagged quarantine when its payload shrank the raw
/// (8-byte-per-value) representation by less than this factor — a cheap
/// health signal, not a decode precondition (see the design note on
/// `health_quarantine` being purely observational).
const QUARANTINE_RATIO_BASELINE: f64 = 1.5;

fn block_flags(n_items: usize, payload_len: usize) -> u8 {
    let raw = (n_items * 8) as f64;
    let ratio = if payload_len == 0 { f64::INFINITY } else { raw / payload_len as f64 };
    if ratio < QUARANTINE_RATIO_BASELINE {
        QUARANTINE_FLAG
    } else {
        0
    }
}

pub fn trial_int_blocks(values: &[i64], block_size: usize) -> Vec<SealedBlock> {
    if values.is_empty() {
        return Vec::new();
    }
    let chunks: Vec<&[i64]> = values.chunks(block_size.max(1)).collect();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        return chunks
            .par_iter()
            .map(|chunk| {
                let (id, payload) = trial_best_int(chunk);
                let flags = block_flags(chunk.len(), payload.len());
                SealedBlock { inner_codec_id: id, n_items: chunk.len() as u32, payload, flags }
            })
            .collect();
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks
            .into_iter()
            .map(|chunk| {
                let (id, payload) = trial_best_int(chunk);
                let flags = block_flags(chunk.len(), payload.len());
                SealedBlock { inner_codec_id: id, n_items: chunk.len() as u32, payload, flags }
            })
            .collect()
    }
}

pub fn trial_float_blocks(values: &[f64], block_size: usize) -> Vec<SealedBlock> {
    if values.is_empty() {
        return Vec::new();
    }
    let chunks: Vec<&[f64]> = values.chunks(block_size.max(1)).collect();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        return chunks
            .par_iter()
            .map(|chunk| {
                let (id, payload) = trial_best_float(chunk);
                let flags = block_flags(chunk.len(), payload.len());
                SealedBlock { inner_codec_id: id, n_items: chunk.len() as u32, payload, flags }
            })
            .collect();
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks
            .into_iter()
            .map(|chunk| {
                let (id, payload) = trial_best_float(chunk);
                let flags = block_flags(chunk.len(), payload.len());
                SealedBlock { inner_codec_id: id, n_items: chunk.len() as u32, payload, flags }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_blocks_match_expected_chunking() {
        let values: Vec<i64> = (0..2500).map(|i| 1000 + i % 13).collect();
        let blocks = trial_int_blocks(&values, 1000);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].n_items, 1000);
        assert_eq!(blocks[2].n_items, 500);
    }

    #[test]
    fn float_blocks_roundtrip_via_inner() {
        let values: Vec<f64> = (0..500).map(|i| i as f64 * 1.5).collect();
        let blocks = trial_float_blocks(&values, 200);
        assert_eq!(blocks.len(), 3);
        let mut total = 0usize;
        let mut decoded = Vec::new();
        for b in &blocks {
            decoded.extend(crate::inner::decode_float(b.inner_codec_id, &b.payload, b.n_items as usize).unwrap());
            total += b.n_items as usize;
        }
        assert_eq!(total, values.len());
        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_input_yields_no_blocks() {
        assert!(trial_int_blocks(&[], 1000).is_empty());
        assert!(trial_float_blocks(&[], 1000).is_empty());
    }

    #[test]
    fn noisy_block_is_flagged_quarantine_but_still_decodes() {
        // A block with no exploitable structure: every value is an
        // independent full-range random draw, so no inner codec beats a
        // near-1:1 ratio. The flag is set, but the values still round-trip.
        let mut seed = 0x2545F4914F6CDD1Du64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed as i64) % 1_000_000_000
        };
        let values: Vec<i64> = (0..300).map(|_| next()).collect();
        let blocks = trial_int_blocks(&values, 1000);
        assert_eq!(blocks.len(), 1);
        assert_ne!(blocks[0].flags & QUARANTINE_FLAG, 0, "expected the noisy block to be flagged quarantine");
        let decoded = crate::inner::decode_int(blocks[0].inner_codec_id, &blocks[0].payload, blocks[0].n_items as usize).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn trending_block_is_not_flagged_quarantine() {
        let values: Vec<i64> = (0..1000).map(|i| 1000 + i).collect();
        let blocks = trial_int_blocks(&values, 1000);
        assert_eq!(blocks[0].flags & QUARANTINE_FLAG, 0);
    }
}
