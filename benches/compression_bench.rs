use criterion::{black_box, criterion_group, criterion_main, Criterion};
use biozip::codec::{Codec, Lz4Codec, ZstdCodec};

fn bench_compression(c: &mut Criterion) {
    let mut data = Vec::new();
    for i in 0..40_000u32 {
        data.extend_from_slice(format!("chr1\t{}\trs{}\tA\tG\t.\tPASS\tDP={}\n", 10_000 + i, i, i % 97).as_bytes());
    }
    let zstd = ZstdCodec;
    let lz4 = Lz4Codec;
    c.bench_function("zstd_compress_vcf_block", |b| b.iter(|| zstd.compress(black_box(&data), 3)));
    c.bench_function("lz4_compress_vcf_block", |b| b.iter(|| lz4.compress(black_box(&data), 0)));
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
