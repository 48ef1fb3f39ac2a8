use config::{EngineOptions, RotationConfig};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rotation::{no_crash, Batched, BatchedDb, Database, DbOperations, RotatingDb};
use std::sync::Arc;
use tempfile::tempdir;

const N_KEYS: usize = 1_000;
const VALUE_SIZE: usize = 100;

fn options() -> EngineOptions {
    EngineOptions {
        wal_sync: false,
        checkpoint_bytes: 4 * 1024 * 1024,
        max_piece_bytes: 0,
    }
}

fn batched_commit_benchmark(c: &mut Criterion) {
    c.bench_function("batched_commit_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let config = RotationConfig::default().with_engine(options());
                let db = Arc::new(RotatingDb::open(dir.path(), &config, no_crash()).unwrap());
                (dir, db)
            },
            |(_dir, db)| {
                let batched = BatchedDb::unchecked(db);
                for i in 0..N_KEYS {
                    batched
                        .insert(format!("key{}", i).as_bytes(), &[b'x'; VALUE_SIZE])
                        .unwrap();
                }
                batched.commit("").unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn rotated_lookup_benchmark(c: &mut Criterion) {
    c.bench_function("rotated_lookup_5_pieces_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let config = RotationConfig::default().with_engine(options());
                let db = RotatingDb::open(dir.path(), &config, no_crash()).unwrap();
                // spread keys over every piece of the ring
                for i in 0..N_KEYS {
                    if i % (N_KEYS / 4) == 0 && i > 0 {
                        db.rotate().unwrap();
                    }
                    db.insert(format!("key{}", i).as_bytes(), &[b'x'; VALUE_SIZE])
                        .unwrap();
                }
                (dir, db)
            },
            |(_dir, db)| {
                for i in 0..N_KEYS {
                    let key = format!("key{}", i).into_bytes();
                    assert!(db.lookup(&key).unwrap().is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, batched_commit_benchmark, rotated_lookup_benchmark);
criterion_main!(benches);
