use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ingest_server::slots::{MAX_CLIENTS, SlotTable};

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("slots");
    group.throughput(Throughput::Elements(1));

    // Claim and free the last free slot of an almost full table.
    group.bench_function("allocate_release_tail", |bencher| {
        let mut table = SlotTable::new(MAX_CLIENTS);
        for value in 0..MAX_CLIENTS - 1 {
            table.allocate(value).ok();
        }

        bencher.iter(|| {
            let slot = table.allocate(usize::MAX).ok();
            std::hint::black_box(slot);
            table.release(MAX_CLIENTS - 1);
        });
    });

    group.bench_function("allocate_release_large", |bencher| {
        let mut table = SlotTable::new(4096);
        for value in 0..4095 {
            table.allocate(value).ok();
        }

        bencher.iter(|| {
            let slot = table.allocate(usize::MAX).ok();
            std::hint::black_box(slot);
            table.release(4095);
        });
    });

    group.bench_function("iter_full", |bencher| {
        let mut table = SlotTable::new(MAX_CLIENTS);
        for value in 0..MAX_CLIENTS {
            table.allocate(value).ok();
        }

        bencher.iter(|| std::hint::black_box(table.iter().map(|(_, value)| *value).sum::<usize>()));
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
