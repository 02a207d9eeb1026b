use std::fs;

use gics::schema::{CodecStrategy, FieldSpec, ItemIdType};
use gics::{FieldValue, ItemKey, Reader, ReaderOptions, SchemaProfile, Snapshot, Writer, WriterOptions};
use tempfile::NamedTempFile;

fn legacy_snapshot(ts: i64, items: &[(i64, f64, f64)]) -> Snapshot {
    let mut snap = Snapshot::new(ts);
    for &(id, price, qty) in items {
        snap.items.push((ItemKey::Number(id), vec![FieldValue::Number(price), FieldValue::Number(qty)]));
    }
    snap
}

#[test]
fn pack_and_unpack_round_trip_through_disk() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
    for t in 0..500i64 {
        writer.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0), (2, (2000 - t) as f64, 2.0)])).unwrap();
    }
    let bytes = writer.finish().unwrap();
    fs::write(&path, &bytes).unwrap();

    let data = fs::read(&path).unwrap();
    let reader = Reader::new(&data, ReaderOptions::default()).unwrap();
    let snapshots = reader.get_all_snapshots().unwrap();
    assert_eq!(snapshots.len(), 500);
    assert_eq!(snapshots[499].items[&1].price, 1499.0);
    assert_eq!(snapshots[499].items[&2].price, 1501.0);
}

#[test]
fn encrypted_file_round_trips_and_rejects_wrong_password() {
    let schema = SchemaProfile::new(
        "trades",
        1,
        ItemIdType::String,
        vec![FieldSpec::numeric("price", CodecStrategy::Value)],
    )
    .unwrap();

    let mut options = WriterOptions::default();
    options.schema = Some(schema);
    options.password = Some("correct horse battery staple".to_string());
    let mut writer = Writer::new(Vec::new(), options).unwrap();

    for t in 0..50i64 {
        let mut snap = Snapshot::new(t);
        snap.items.push((ItemKey::String("AAPL".to_string()), vec![FieldValue::Number(150.0 + t as f64)]));
        snap.items.push((ItemKey::String("MSFT".to_string()), vec![FieldValue::Number(300.0 + t as f64)]));
        writer.push(snap).unwrap();
    }
    let bytes = writer.finish().unwrap();

    let good = Reader::new(
        &bytes,
        ReaderOptions { password: Some("correct horse battery staple".to_string()), ..ReaderOptions::default() },
    );
    assert!(good.is_ok());
    let snapshots = good.unwrap().get_all_generic_snapshots().unwrap();
    assert_eq!(snapshots.len(), 50);

    let bad = Reader::new(&bytes, ReaderOptions { password: Some("wrong password".to_string()), ..ReaderOptions::default() });
    assert!(bad.is_err());

    let missing = Reader::new(&bytes, ReaderOptions::default());
    assert!(missing.is_err());
}

#[test]
fn recovery_scan_reads_back_an_on_disk_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let mut opts = WriterOptions::default();
    opts.segment_byte_limit = 500;
    let mut writer = Writer::new(Vec::new(), opts).unwrap();
    for t in 0..200i64 {
        writer.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0)])).unwrap();
    }
    let bytes = writer.finish().unwrap();
    fs::write(&path, &bytes).unwrap();

    let report = gics::scan_file(&path).unwrap();
    assert_eq!(report.quality, gics::RecoveryQuality::Full);
    assert_eq!(report.recovered_snapshots.len(), 200);
}

#[test]
fn append_across_a_file_round_trip() {
    let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
    for t in 0..30i64 {
        writer.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0)])).unwrap();
    }
    let first = writer.finish().unwrap();

    let mut appended = Writer::open_append(&first, WriterOptions::default()).unwrap();
    for t in 30..60i64 {
        appended.push(legacy_snapshot(t, &[(1, (1000 + t) as f64, 1.0)])).unwrap();
    }
    let combined = appended.finish().unwrap();

    let reader = Reader::new(&combined, ReaderOptions::default()).unwrap();
    let snapshots = reader.get_all_snapshots().unwrap();
    assert_eq!(snapshots.len(), 60);
    assert_eq!(snapshots[59].items[&1].price, 1059.0);
}
