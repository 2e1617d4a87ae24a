use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use migrate_core::copy_engine::parse_copy_bytes;

fn sample_chunk(rows: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(rows * 32);
    for i in 0..rows {
        buf.extend_from_slice(format!("{i},{},some-value,true\n", 1_700_000_000_000u64 + i as u64).as_bytes());
    }
    buf
}

fn bench_parse_copy_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_copy_bytes");
    for &rows in &[1_000usize, 10_000, 100_000] {
        let chunk = sample_chunk(rows);
        group.throughput(Throughput::Bytes(chunk.len() as u64));
        group.bench_function(format!("{rows}_rows"), |b| {
            b.iter(|| parse_copy_bytes(black_box(&chunk)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_copy_bytes);
criterion_main!(benches);
