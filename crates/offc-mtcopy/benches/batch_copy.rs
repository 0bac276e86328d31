use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use offc_mem::{folios_mc_copy, Batch, FolioFlags, PhysMemory};
use offc_mtcopy::{CpuMtMigrator, MtConfig};

fn criterion_config() -> Criterion {
    match std::env::var("OFFC_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30),
    }
}

fn setup(nr_pairs: usize, pages: usize) -> (PhysMemory, Batch) {
    let mem = PhysMemory::new((nr_pairs * pages * 2) as u64).expect("memory");
    let mut src = Vec::with_capacity(nr_pairs);
    let mut dst = Vec::with_capacity(nr_pairs);
    for i in 0..nr_pairs {
        let s = mem.alloc_folio(pages, FolioFlags::empty()).expect("src");
        mem.fill_folio(&s, i as u8).expect("fill");
        src.push(s);
        dst.push(mem.alloc_folio(pages, FolioFlags::empty()).expect("dst"));
    }
    let batch = Batch::from_lists(dst, src).expect("batch");
    (mem, batch)
}

fn bench_batch_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_copy");

    for &(nr_pairs, pages) in &[(2usize, 64usize), (64, 1), (512, 1)] {
        let (mem, batch) = setup(nr_pairs, pages);
        group.throughput(Throughput::Bytes(batch.total_bytes() as u64));
        let label = format!("{nr_pairs}x{pages}p");

        group.bench_with_input(BenchmarkId::new("default", &label), &batch, |b, batch| {
            b.iter(|| folios_mc_copy(&mem, batch).expect("copy"))
        });

        for threads in [1usize, 4, 16] {
            let engine = CpuMtMigrator::new(&MtConfig {
                threads,
                pool_threads: threads,
            })
            .expect("engine");
            group.bench_with_input(
                BenchmarkId::new(format!("mt{threads}"), &label),
                &batch,
                |b, batch| b.iter(|| engine.copy_batch(&mem, batch).expect("copy")),
            );
        }
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_batch_copy
}
criterion_main!(benches);
