//! Benchmarks for store operations.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use kiwi_store::config::{CacheConfig, StoreConfig};
use kiwi_store::connection::{TripleConnection, TriplePattern};
use kiwi_store::model::Term;
use kiwi_store::store::TripleStore;

fn ex(local: impl std::fmt::Display) -> Term {
    Term::uri(format!("http://example.org/{local}"))
}

fn open(dir: &tempfile::TempDir, cache: CacheConfig) -> TripleStore {
    TripleStore::open(StoreConfig::sqlite(dir.path().join("bench.db")).with_cache(cache)).unwrap()
}

fn populate(store: &TripleStore, n: i64) {
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    for i in 0..n {
        conn.add_statement(&ex(i % 100), &ex("value"), &Term::integer(i), None)
            .unwrap();
    }
    conn.commit().unwrap();
}

fn bench_add_commit(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open(&dir, CacheConfig::default());
    let mut next = 0i64;

    c.bench_function("add_commit_100", |bench| {
        bench.iter_batched(
            || {
                next += 100;
                next
            },
            |base| {
                let mut conn = store.connection().unwrap();
                conn.begin().unwrap();
                for i in base..base + 100 {
                    conn.add_statement(&ex("s"), &ex("p"), &Term::integer(i), None)
                        .unwrap();
                }
                conn.commit().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_lookup(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let cached = open(&dir, CacheConfig::default());
    populate(&cached, 1_000);
    let uncached = TripleStore::open(
        StoreConfig::sqlite(dir.path().join("bench.db")).with_cache(CacheConfig::disabled()),
    )
    .unwrap();

    c.bench_function("lookup_node_cached", |bench| {
        bench.iter(|| {
            let conn = cached.connection().unwrap();
            black_box(conn.lookup_node(&ex(42)).unwrap())
        })
    });
    c.bench_function("lookup_node_uncached", |bench| {
        bench.iter(|| {
            let conn = uncached.connection().unwrap();
            black_box(conn.lookup_node(&ex(42)).unwrap())
        })
    });
}

fn bench_query(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open(&dir, CacheConfig::default());
    populate(&store, 10_000);
    let conn = store.connection().unwrap();

    c.bench_function("query_subject_100", |bench| {
        let pattern = TriplePattern::any().subject(ex(7));
        bench.iter(|| black_box(conn.get_statements(&pattern).unwrap().count()))
    });
    c.bench_function("size_all", |bench| {
        bench.iter(|| black_box(conn.size(&[]).unwrap()))
    });
}

criterion_group!(benches, bench_add_commit, bench_lookup, bench_query);
criterion_main!(benches);
