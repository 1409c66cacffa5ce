use criterion::{black_box, criterion_group, criterion_main, Criterion};

use corelib::{Locator, PartitionedRing, RingBuilder, RingConfig, RingMember};

fn members(n: usize) -> Vec<RingMember> {
    (0..n).map(|i| RingMember::new(format!("10.0.{}.{}:3478", i / 256, i % 256))).collect()
}

fn locate_benchmark(c: &mut Criterion) {
    let ring = RingBuilder::new().build();
    for m in members(64) {
        ring.add(m);
    }
    let keys: Vec<String> = (0..1024).map(|i| format!("check_t1_v1:snap:doc:{i}#view@user:{i}")).collect();

    c.bench_function("hash_ring_locate", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(ring.locate(keys[i].as_bytes()));
        })
    });
    c.bench_function("hash_ring_closest_3", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(ring.closest_n(keys[i].as_bytes(), 3));
        })
    });

    let partitioned = PartitionedRing::new(RingConfig::default());
    for m in members(64) {
        partitioned.add(m);
    }
    c.bench_function("partitioned_ring_locate", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(partitioned.locate(keys[i].as_bytes()));
        })
    });
}

fn membership_benchmark(c: &mut Criterion) {
    c.bench_function("hash_ring_add_remove", |b| {
        let ring = RingBuilder::new().build();
        for m in members(63) {
            ring.add(m);
        }
        let extra = RingMember::new("10.9.9.9:3478");
        b.iter(|| {
            ring.add(extra.clone());
            ring.remove(&extra);
        })
    });
}

criterion_group!(benches, locate_benchmark, membership_benchmark);
criterion_main!(benches);
