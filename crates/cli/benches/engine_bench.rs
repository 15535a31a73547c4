use config::Options;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Components, Engine, InlineExecutor};
use std::sync::Arc;
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn open(dir: &std::path::Path) -> Engine {
    let components = Components::default().executor(Arc::new(InlineExecutor));
    Engine::open_with(dir, Options::default().wal_sync(false), components).unwrap()
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:08}", i).into_bytes()
}

fn engine_put_benchmark(c: &mut Criterion) {
    c.bench_function("engine_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let engine = open(dir.path());
                (dir, engine)
            },
            |(_dir, engine)| {
                let value = vec![b'x'; VALUE_SIZE];
                for i in 0..N_KEYS {
                    engine.put(&key(i), &value).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn engine_get_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        engine.put(&key(i), &value).unwrap();
    }

    c.bench_function("engine_get_memtable_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(engine.get(&key(i)).unwrap().is_some());
            }
        });
    });

    engine.compact_range(None, None).unwrap();
    c.bench_function("engine_get_tables_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(engine.get(&key(i)).unwrap().is_some());
            }
        });
    });

    c.bench_function("engine_get_miss_10k", |b| {
        b.iter(|| {
            for i in N_KEYS..2 * N_KEYS {
                assert!(engine.get(&key(i)).unwrap().is_none());
            }
        });
    });
}

criterion_group!(benches, engine_put_benchmark, engine_get_benchmark);
criterion_main!(benches);
