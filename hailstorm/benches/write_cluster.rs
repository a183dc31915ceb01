//! Benchmarks for cluster planning and emission

use criterion::{criterion_group, criterion_main, Criterion};
use hailstorm::{
    read_header, write_cluster, DataView, DefaultChunkStrategy, HailstormWriteData,
    HailstormWriteParams,
};
use std::hint::black_box;

/// Build the inputs for a cluster of `count` resources of `size` bytes each.
fn generate_resources(count: usize, size: usize) -> (Vec<String>, Vec<u8>, Vec<u8>) {
    let paths = (0..count)
        .map(|i| format!("data/resource_{i:04}.bin"))
        .collect();
    let blob = vec![0x7Eu8; size];
    let meta = vec![0x15u8; 64];
    (paths, blob, meta)
}

fn benchmark_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_cluster");

    for (count, size) in [(64usize, 4096usize), (1024, 4096), (256, 65536)] {
        let (paths, blob, meta) = generate_resources(count, size);
        let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let views: Vec<DataView<'_>> = (0..count).map(|_| DataView::new(&blob, 8)).collect();
        let metas: Vec<DataView<'_>> = (0..count).map(|_| DataView::new(&meta, 8)).collect();

        group.bench_function(format!("{count}_resources_{size}_bytes"), |b| {
            b.iter(|| {
                let mut strategy = DefaultChunkStrategy;
                let mut params = HailstormWriteParams::new(&mut strategy);
                let write_data = HailstormWriteData {
                    paths: black_box(&path_refs),
                    data: &views,
                    metadata: &metas,
                    ..HailstormWriteData::default()
                };
                let cluster = write_cluster(&mut params, &write_data).unwrap();
                black_box(cluster);
            });
        });
    }

    group.finish();
}

fn benchmark_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_header");

    let (paths, blob, meta) = generate_resources(1024, 4096);
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let views: Vec<DataView<'_>> = (0..1024).map(|_| DataView::new(&blob, 8)).collect();
    let metas: Vec<DataView<'_>> = (0..1024).map(|_| DataView::new(&meta, 8)).collect();

    let mut strategy = DefaultChunkStrategy;
    let mut params = HailstormWriteParams::new(&mut strategy);
    let write_data = HailstormWriteData {
        paths: &path_refs,
        data: &views,
        metadata: &metas,
        ..HailstormWriteData::default()
    };
    let cluster = write_cluster(&mut params, &write_data).unwrap();

    group.bench_function("1024_resources", |b| {
        b.iter(|| {
            let parsed = read_header(black_box(&cluster)).unwrap();
            black_box(parsed);
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_write, benchmark_read);
criterion_main!(benches);
