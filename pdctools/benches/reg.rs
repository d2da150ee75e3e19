#[allow(unused_imports)]
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pdctools::reg::{self, FTX0, TIME};

fn time_word(c: &mut Criterion) {
    c.bench_function("time_word", |b| {
        b.iter(|| reg::time_word(black_box(50), black_box(10), black_box(2)))
    });
}

fn encode_named(c: &mut Criterion) {
    c.bench_function("encode_named", |b| {
        b.iter(|| {
            FTX0.encode_named(black_box([("CMD_DELAY", 0), ("MODE", 2), ("CMD_MODE", 1), ("EN", 1)]))
        })
    });
}

fn decode_all(c: &mut Criterion) {
    c.bench_function("decode_all", |b| b.iter(|| TIME.decode_all(black_box(0xDEDE))));
}

criterion_group!(benches, time_word, encode_named, decode_all);
criterion_main!(benches);
