// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for the versioned engine, page I/O and stream scans.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use folio::storage::{Key, MvccEntry, MvccStore, RocksMvccStore, Value, Version};
use folio::{Error, PageKey, StorageConfig, StorageStream, TransactionalStorage};
use tempfile::TempDir;

fn create_test_store() -> (RocksMvccStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = RocksMvccStore::open(dir.path()).unwrap();
    (store, dir)
}

fn create_test_storage(config: StorageConfig) -> (Arc<TransactionalStorage>, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = TransactionalStorage::open_path(dir.path(), config).unwrap();
    (Arc::new(storage), dir)
}

fn bench_engine_point_read(c: &mut Criterion) {
    let (store, _dir) = create_test_store();

    // Pre-populate with 10000 keys, each at a few versions
    for version in 1..=3u64 {
        let entries = (0..10000)
            .map(|i| {
                MvccEntry::new(
                    Key::from(format!("key{:05}", i)),
                    Value::new(vec![0u8; 100]),
                    Version(version),
                )
            })
            .collect();
        store.batch_write(entries).unwrap();
    }

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("point_read", |b| {
        b.iter_batched(
            || Key::from(format!("key{:05}", rand::random::<u32>() % 10000)),
            |key| store.read(&key, Version(2)).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("scan_100", |b| {
        b.iter(|| {
            let rows = store
                .scan(&Key::from("key00000"), &Key::from("key99999"), Version::LATEST, 100)
                .unwrap();
            black_box(rows)
        })
    });

    group.finish();
}

fn bench_page_io(c: &mut Criterion) {
    let (storage, _dir) = create_test_storage(StorageConfig::default());

    let mut group = c.benchmark_group("pages");
    group.throughput(Throughput::Bytes(64 * 1024));

    let counter = std::sync::atomic::AtomicU64::new(0);
    group.bench_function("add_page_64k", |b| {
        b.iter(|| {
            // Distinct content per iteration so deduplication does not kick in
            let i = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut content = vec![0u8; 64 * 1024];
            content[..8].copy_from_slice(&i.to_be_bytes());
            storage.batch(|a| a.pages().add_page(&content)).unwrap()
        })
    });

    let keys: Vec<PageKey> = (0..64u8)
        .map(|i| {
            storage
                .batch(|a| a.pages().add_page(&vec![i; 64 * 1024]))
                .unwrap()
        })
        .collect();
    let mut buf = vec![0u8; 64 * 1024];

    group.bench_function("read_page_64k", |b| {
        b.iter(|| {
            let key = keys[rand::random::<usize>() % keys.len()];
            storage
                .batch(|a| a.pages().read_page(key, &mut buf))
                .unwrap()
        })
    });

    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    const PAGES: usize = 256;
    const PAGE_SIZE: usize = 16 * 1024;

    let config = StorageConfig::default().with_max_page_size(PAGE_SIZE);
    let (storage, _dir) = create_test_storage(config);

    storage
        .batch(|a| {
            a.files().put_file("blob.bin", None, BTreeMap::new())?;
            for i in 0..PAGES {
                let mut content = vec![(i % 251) as u8; PAGE_SIZE];
                content[..8].copy_from_slice(&(i as u64).to_be_bytes());
                let key = a.pages().add_page(&content)?;
                a.files().associate_page("blob.bin", i as u32, key)?;
            }
            a.files().complete_file_upload("blob.bin")?;
            Ok::<_, Error>(())
        })
        .unwrap();

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes((PAGES * PAGE_SIZE) as u64));

    group.bench_function("sequential_scan_4mb", |b| {
        let mut out = Vec::with_capacity(PAGES * PAGE_SIZE);
        b.iter(|| {
            out.clear();
            let mut stream = StorageStream::open(Arc::clone(&storage), "blob.bin").unwrap();
            stream.read_to_end(&mut out).unwrap();
            black_box(out.len())
        })
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("random_seek_read", |b| {
        let mut stream = StorageStream::open(Arc::clone(&storage), "blob.bin").unwrap();
        let mut buf = [0u8; 512];
        b.iter(|| {
            let offset = rand::random::<u64>() % (PAGES * PAGE_SIZE) as u64;
            stream.seek(SeekFrom::Start(offset)).unwrap();
            black_box(stream.read(&mut buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_engine_point_read, bench_page_io, bench_stream);
criterion_main!(benches);
