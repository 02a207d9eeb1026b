use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gics::writer::{Writer, WriterOptions, DEFAULT_BLOCK_SIZE};
use gics::{FieldValue, ItemKey, Snapshot};

fn trending_snapshots(n: i64) -> Vec<Snapshot> {
    let mut price = 10_000i64;
    (0..n)
        .map(|t| {
            price += (t % 7) - 3;
            let mut snap = Snapshot::new(t);
            snap.items.push((ItemKey::Number(1), vec![FieldValue::Number(price as f64), FieldValue::Number(1.0)]));
            snap
        })
        .collect()
}

fn bench_inner_trial(c: &mut Criterion) {
    let values: Vec<i64> = (0..(DEFAULT_BLOCK_SIZE as i64 * 4)).map(|i| 1_000_000 + (i % 11) - 5).collect();
    c.bench_function("trial_int_blocks_4x1000", |b| {
        b.iter(|| gics::perf::trial_int_blocks(black_box(&values), DEFAULT_BLOCK_SIZE))
    });

    let floats: Vec<f64> = (0..(DEFAULT_BLOCK_SIZE as i64 * 4)).map(|i| i as f64 * 1.0001).collect();
    c.bench_function("trial_float_blocks_4x1000", |b| {
        b.iter(|| gics::perf::trial_float_blocks(black_box(&floats), DEFAULT_BLOCK_SIZE))
    });
}

fn bench_segment_seal(c: &mut Criterion) {
    let snapshots = trending_snapshots(5_000);
    c.bench_function("seal_5000_trending_snapshots", |b| {
        b.iter(|| {
            let mut writer = Writer::new(Vec::new(), WriterOptions::default()).unwrap();
            for snap in black_box(&snapshots) {
                writer.push(snap.clone()).unwrap();
            }
            writer.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_inner_trial, bench_segment_seal);
criterion_main!(benches);
