use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tangle::{PodCodec, Tangle, TangleKey};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Tangle<u64, PodCodec<u64>> {
    Tangle::builder()
        .directory(dir)
        .codec(PodCodec::new())
        .open()
        .unwrap()
}

fn bench_set(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let tangle = open(dir.path());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));
    let mut next = 0u64;
    group.bench_function("sequential_u64", |b| {
        b.iter(|| {
            tangle.set(TangleKey::from(next), next).wait().unwrap();
            next += 1;
        })
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let tangle = open(dir.path());
    for i in 0..10_000u64 {
        tangle.set(TangleKey::from(i), i).wait().unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));
    let mut probe = 0u64;
    group.bench_function("point_lookup", |b| {
        b.iter(|| {
            let value = tangle.get(TangleKey::from(probe % 10_000)).wait().unwrap();
            probe = probe.wrapping_add(7919);
            value
        })
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(256));
    group.bench_function("insert_256", |b| {
        let dir = tempdir().unwrap();
        let tangle = open(dir.path());
        let mut base = 0u64;
        b.iter_batched(
            || {
                let entries: Vec<(TangleKey, u64)> = (base..base + 256)
                    .map(|i| (TangleKey::from(i), i))
                    .collect();
                base += 256;
                entries
            },
            |entries| tangle.batch(entries).wait().unwrap(),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_batch);
criterion_main!(benches);
