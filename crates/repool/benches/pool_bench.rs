//! Buffer pool benchmarks: recycled hot path, creation path, and hinted
//! shard traffic.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use repool::{acquire, release, BufferElement, HeapAllocator, PooledBuffer, SHARD_COUNT};

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
struct Sample(u64);
// Safety: zero is a valid value and the type has no drop glue.
unsafe impl BufferElement for Sample {}

fn bench_recycled_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("recycled_roundtrip");
    for &count in &[256usize, 4096, 65536] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            // Warm the pool so every iteration hits the free list.
            let warm = acquire::<Sample, HeapAllocator>(count, false, None).unwrap();
            unsafe { release::<Sample, HeapAllocator>(warm, count, None).unwrap() };

            b.iter(|| {
                let base = acquire::<Sample, HeapAllocator>(black_box(count), false, None).unwrap();
                unsafe { release::<Sample, HeapAllocator>(base, count, None).unwrap() };
            });
        });
    }
    group.finish();
}

fn bench_hinted_shards(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    c.bench_function("hinted_roundtrip", |b| {
        b.iter(|| {
            let hint = rng.gen_range(0..SHARD_COUNT);
            let base = acquire::<Sample, HeapAllocator>(black_box(1024), false, Some(hint)).unwrap();
            unsafe { release::<Sample, HeapAllocator>(base, 1024, Some(hint)).unwrap() };
        });
    });
}

fn bench_pooled_buffer(c: &mut Criterion) {
    c.bench_function("pooled_buffer_roundtrip", |b| {
        b.iter(|| {
            let mut buffer: PooledBuffer<Sample> = PooledBuffer::new(black_box(4096)).unwrap();
            buffer[0] = Sample(1);
            black_box(&buffer);
        });
    });
}

criterion_group!(
    benches,
    bench_recycled_roundtrip,
    bench_hinted_shards,
    bench_pooled_buffer
);
criterion_main!(benches);
