use gics::{FieldValue, ItemKey, Reader, ReaderOptions, Snapshot, Writer, WriterOptions};
use proptest::prelude::*;

fn arb_snapshots(max_len: usize) -> impl Strategy<Value = Vec<Snapshot>> {
    proptest::collection::vec((1i64..=3, proptest::collection::vec((-1_000_000i64..1_000_000, -1_000i64..1_000), 0..6)), 1..max_len)
        .prop_map(|steps| {
            let mut timestamp = 0i64;
            let mut snapshots = Vec::with_capacity(steps.len());
            for (dt, items) in steps {
                timestamp += dt;
                let mut keys: Vec<i64> = items.iter().map(|&(id, _)| id.rem_euclid(50)).collect();
                keys.sort_unstable();
                keys.dedup();
                let mut snap = Snapshot::new(timestamp);
                for (i, &id) in keys.iter().enumerate() {
                    let qty = items.get(i).map(|&(_, q)| q as f64).unwrap_or(0.0);
                    snap.items.push((ItemKey::Number(id), vec![FieldValue::Number((1000 + id) as f64), FieldValue::Number(qty)]));
                }
                snapshots.push(snap);
            }
            snapshots
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Round trip: every pushed snapshot comes back bit-exact.
    #[test]
    fn round_trip_is_lossless(snapshots in arb_snapshots(40)) {
        let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for s in &snapshots {
            writer.push(s.clone()).unwrap();
        }
        let bytes = writer.finish().unwrap();
        let reader = Reader::new(&bytes, ReaderOptions::default()).unwrap();
        let decoded = reader.get_all_snapshots().unwrap();

        prop_assert_eq!(decoded.len(), snapshots.len());
        for (original, back) in snapshots.iter().zip(decoded.iter()) {
            prop_assert_eq!(original.timestamp, back.timestamp);
            for (key, record) in &original.items {
                let ItemKey::Number(id) = key else { unreachable!() };
                let FieldValue::Number(price) = &record[0] else { unreachable!() };
                let FieldValue::Number(qty) = &record[1] else { unreachable!() };
                let got = &back.items[id];
                prop_assert_eq!(got.price, *price);
                prop_assert_eq!(got.quantity, *qty);
            }
        }
    }

    /// Byte-determinism: packing the same snapshots twice yields identical bytes.
    #[test]
    fn encoding_is_byte_deterministic(snapshots in arb_snapshots(20)) {
        let encode = |snaps: &[Snapshot]| {
            let mut w = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
            for s in snaps {
                w.push(s.clone()).unwrap();
            }
            w.finish().unwrap()
        };
        let a = encode(&snapshots);
        let b = encode(&snapshots);
        prop_assert_eq!(a, b);
    }

    /// Any single-byte flip is either rejected or (rarely, for padding bytes)
    /// leaves the decoded content identical — it must never silently corrupt
    /// a snapshot's values.
    #[test]
    fn tamper_is_detected_or_harmless(snapshots in arb_snapshots(20), flip_idx in 0usize..4096) {
        let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for s in &snapshots {
            writer.push(s.clone()).unwrap();
        }
        let bytes = writer.finish().unwrap();
        if bytes.is_empty() {
            return Ok(());
        }
        let idx = flip_idx % bytes.len();
        let mut tampered = bytes.clone();
        tampered[idx] ^= 0x01;

        let result = Reader::new(&tampered, ReaderOptions::default()).and_then(|r| r.get_all_snapshots());
        match result {
            Err(_) => {}
            Ok(decoded) => prop_assert_eq!(tampered, bytes, "decode succeeded with altered bytes at {}", idx),
        }
    }

    /// Truncating the file at any prefix length is always rejected, never
    /// served as a partial result.
    #[test]
    fn truncation_is_always_rejected(snapshots in arb_snapshots(15), cut in 0usize..4096) {
        let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for s in &snapshots {
            writer.push(s.clone()).unwrap();
        }
        let bytes = writer.finish().unwrap();
        if bytes.is_empty() {
            return Ok(());
        }
        let cut = cut % bytes.len();
        let prefix = &bytes[..cut];
        let result = Reader::new(prefix, ReaderOptions::default()).and_then(|r| r.get_all_snapshots());
        prop_assert!(result.is_err());
    }

    /// Query never returns a snapshot that does not actually contain the key,
    /// and every snapshot that does contain the key is found.
    #[test]
    fn skip_scan_query_matches_linear_scan(snapshots in arb_snapshots(40), probe in 0i64..50) {
        let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
        for s in &snapshots {
            writer.push(s.clone()).unwrap();
        }
        let bytes = writer.finish().unwrap();
        let reader = Reader::new(&bytes, ReaderOptions::default()).unwrap();

        let key = ItemKey::Number(probe);
        let queried = reader.query(&key).unwrap();
        let expected: Vec<i64> = snapshots
            .iter()
            .filter(|s| s.items.iter().any(|(k, _)| *k == key))
            .map(|s| s.timestamp)
            .collect();
        let got: Vec<i64> = queried.iter().map(|s| s.timestamp).collect();
        prop_assert_eq!(got, expected);
    }
}
