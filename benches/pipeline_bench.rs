use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jot::{Codepage, Config, FileManager, LoadOptions, SaveMode, ViewId};
use std::fs;
use std::time::Duration;

fn sample_text(bytes: usize) -> String {
    let line = "The quick brown fox jumps over the lazy dog. Grüße, naïve café!\n";
    line.repeat(bytes / line.len() + 1)
}

fn load_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    group.measurement_time(Duration::from_secs(10));

    let dir = tempfile::tempdir().unwrap();
    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let text = sample_text(size);
        let utf8 = dir.path().join(format!("utf8-{size}.txt"));
        fs::write(&utf8, &text).unwrap();

        let (latin1, _, _) = encoding_rs::WINDOWS_1252.encode(&text);
        let ansi = dir.path().join(format!("ansi-{size}.txt"));
        fs::write(&ansi, &latin1).unwrap();

        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("utf8", size), &utf8, |b, path| {
            let mut manager = FileManager::new(Config::default());
            b.iter(|| {
                let id = manager.load(path, LoadOptions::default()).unwrap();
                black_box(manager.doc_length(id));
                manager.close(id, ViewId(0)).unwrap();
            })
        });
        group.bench_with_input(BenchmarkId::new("windows-1252", size), &ansi, |b, path| {
            let mut manager = FileManager::new(Config::default());
            let options = LoadOptions {
                encoding: Some(Codepage::WINDOWS_1252),
                ..LoadOptions::default()
            };
            b.iter(|| {
                let id = manager.load(path, options.clone()).unwrap();
                black_box(manager.doc_length(id));
                manager.close(id, ViewId(0)).unwrap();
            })
        });
    }

    group.finish();
}

fn save_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("save");
    group.measurement_time(Duration::from_secs(10));

    let dir = tempfile::tempdir().unwrap();
    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let text = sample_text(size);
        let mut manager = FileManager::new(Config::default());
        let id = manager.new_empty_document();
        manager.insert_text(id, 0, &text).unwrap();
        let target = dir.path().join(format!("out-{size}.txt"));

        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("utf8", size), &target, |b, path| {
            b.iter(|| manager.save(id, path, SaveMode::Copy).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, load_benchmark, save_benchmark);
criterion_main!(benches);
