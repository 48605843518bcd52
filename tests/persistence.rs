//! Persistence and recovery tests.
//!
//! These tests verify that data, ids and namespaces survive a restart, that
//! a failed commit leaves nothing behind and that every cache setup returns
//! the same answers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiwi_store::cache::MemoryTier;
use kiwi_store::config::{CacheBackend, CacheConfig, StoreConfig};
use kiwi_store::connection::{ConnectionState, StoreConnection, TripleConnection, TriplePattern};
use kiwi_store::error::{KiwiError, TransactionError};
use kiwi_store::model::Term;
use kiwi_store::store::TripleStore;

const EX: &str = "http://example.org/";

fn ex(local: &str) -> Term {
    Term::uri(format!("{EX}{local}"))
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("kiwi.db")
}

fn store_with(dir: &Path, backend: CacheBackend) -> TripleStore {
    let cache = CacheConfig {
        backend,
        ..CacheConfig::default()
    };
    TripleStore::open(StoreConfig::sqlite(db_path(dir)).with_cache(cache)).unwrap()
}

/// Every active statement as sorted text.
fn dump(store: &TripleStore, pattern: &TriplePattern) -> Vec<String> {
    let conn = store.connection().unwrap();
    let mut out: Vec<String> = conn
        .get_statements(pattern)
        .unwrap()
        .map(|t| t.unwrap().to_string())
        .collect();
    out.sort();
    out
}

fn load_sample(store: &TripleStore) {
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    for i in 0..20 {
        let person = ex(&format!("p{i}"));
        conn.add_statement(&person, &ex("age"), &Term::integer(20 + i), None).unwrap();
        conn.add_statement(&person, &ex("name"), &Term::literal(format!("Person {i}")), Some(&ex("people")))
            .unwrap();
        if i > 0 {
            conn.add_statement(&person, &ex("knows"), &ex(&format!("p{}", i - 1)), None)
                .unwrap();
        }
    }
    conn.commit().unwrap();

    conn.begin().unwrap();
    conn.remove_statements(&TriplePattern::any().predicate(ex("knows")).object(ex("p3")))
        .unwrap();
    conn.commit().unwrap();
}

#[test]
fn data_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let before = {
        let store = store_with(dir.path(), CacheBackend::Local);
        load_sample(&store);
        let rows = dump(&store, &TriplePattern::any());
        store.close();
        rows
    };
    assert_eq!(before.len(), 20 + 20 + 19 - 1);

    let store = store_with(dir.path(), CacheBackend::Local);
    assert_eq!(dump(&store, &TriplePattern::any()), before);
    let conn = store.connection().unwrap();
    assert_eq!(conn.size(&[Some(ex("people"))]).unwrap(), 20);
    assert_eq!(conn.get_context_ids().unwrap(), vec![ex("people")]);
}

#[test]
fn ids_keep_growing_across_restarts() {
    let dir = tempfile::TempDir::new().unwrap();
    let (max_node, max_triple) = {
        let store = store_with(dir.path(), CacheBackend::Local);
        let mut conn = store.connection().unwrap();
        conn.begin().unwrap();
        let t = conn.add_statement(&ex("a"), &ex("p"), &ex("b"), None).unwrap();
        conn.commit().unwrap();
        let max_node = [&t.subject, &t.predicate, &t.object]
            .iter()
            .map(|n| n.id())
            .max()
            .unwrap();
        (max_node, t.id)
    };

    let store = store_with(dir.path(), CacheBackend::Local);
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    let t = conn.add_statement(&ex("c"), &ex("p"), &ex("d"), None).unwrap();
    conn.commit().unwrap();
    assert!(t.id > max_triple);
    assert!(t.subject.id() > max_node);
    assert!(t.object.id() > max_node);
    // The predicate node is reused.
    assert!(t.predicate.id() <= max_node);
}

fn collect_count(conn: &impl TripleConnection, subject: Term) -> usize {
    conn.get_statements(&TriplePattern::any().subject(subject))
        .unwrap()
        .count()
}

/// Mixes node and triple inserts, an undelete and soft deletes.
fn mixed_changes(conn: &mut StoreConnection) {
    conn.begin().unwrap();
    conn.add_statement(&ex("a"), &ex("p"), &ex("b"), None).unwrap();
    conn.add_statement(&ex("a"), &ex("p"), &Term::literal("fresh"), Some(&ex("people")))
        .unwrap();
    conn.add_statement(&ex("p4"), &ex("knows"), &ex("p3"), None).unwrap();
    assert_eq!(conn.remove_statements(&TriplePattern::any().subject(ex("p1"))).unwrap(), 3);
    assert_eq!(conn.remove_statements(&TriplePattern::any().subject(ex("p19"))).unwrap(), 3);
}

#[test]
fn failed_commit_persists_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_with(dir.path(), CacheBackend::Local);
    load_sample(&store);
    let before = dump(&store, &TriplePattern::any());
    assert_eq!(before.len(), 58);

    // Fails on a delete, after the inserts and the undelete have run.
    let raw = rusqlite::Connection::open(db_path(dir.path())).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER poison BEFORE UPDATE ON triples \
         WHEN NEW.deleted AND OLD.subject = \
         (SELECT id FROM nodes WHERE svalue = 'http://example.org/p19') \
         BEGIN SELECT RAISE(ABORT, 'injected'); END;",
    )
    .unwrap();

    let mut conn = store.connection().unwrap();
    mixed_changes(&mut conn);
    let err = conn.commit().unwrap_err();
    assert!(matches!(
        err,
        KiwiError::Transaction(TransactionError::CommitFailed { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(conn.state(), ConnectionState::Failed);

    // Only rollback is allowed now.
    assert!(conn.begin().is_err());
    assert!(conn.get_statements(&TriplePattern::any()).is_err());
    conn.rollback().unwrap();
    assert_eq!(conn.state(), ConnectionState::RolledBack);

    assert_eq!(dump(&store, &TriplePattern::any()), before);
    assert_eq!(collect_count(&conn, ex("p1")), 3);
    let other = store.connection().unwrap();
    assert_eq!(other.size(&[]).unwrap(), 58);
    assert!(other.lookup_node(&ex("a")).unwrap().is_none());
    assert!(other.lookup_node(&Term::literal("fresh")).unwrap().is_none());
    drop(store);
    let reopened = store_with(dir.path(), CacheBackend::None);
    assert_eq!(dump(&reopened, &TriplePattern::any()), before);

    // Retrying from begin works once the cause is gone.
    raw.execute_batch("DROP TRIGGER poison").unwrap();
    let mut conn = reopened.connection().unwrap();
    mixed_changes(&mut conn);
    conn.commit().unwrap();
    assert_eq!(dump(&reopened, &TriplePattern::any()).len(), 58 - 6 + 3);
    assert_eq!(collect_count(&conn, ex("p1")), 0);
}

#[test]
fn cache_setups_agree() {
    let patterns = [
        TriplePattern::any(),
        TriplePattern::any().subject(ex("p5")),
        TriplePattern::any().predicate(ex("knows")),
        TriplePattern::any().context(ex("people")),
        TriplePattern::any().default_graph().object(ex("p4")),
    ];

    let mut answers = Vec::new();
    for backend in [CacheBackend::None, CacheBackend::Local, CacheBackend::Memory] {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_with(dir.path(), backend);
        load_sample(&store);
        // Cold and warm reads must agree.
        let cold: Vec<_> = patterns.iter().map(|p| dump(&store, p)).collect();
        let warm: Vec<_> = patterns.iter().map(|p| dump(&store, p)).collect();
        assert_eq!(cold, warm, "{backend:?}");
        assert_eq!(store.cache().is_enabled(), backend != CacheBackend::None);
        answers.push(cold);
    }
    assert_eq!(answers[0], answers[1]);
    assert_eq!(answers[1], answers[2]);
}

#[test]
fn stores_share_a_memory_tier() {
    let dir = tempfile::TempDir::new().unwrap();
    let tier = Arc::new(MemoryTier::new());
    let config = StoreConfig::sqlite(db_path(dir.path()));
    let writer = TripleStore::open_with_cache_tier(config.clone(), tier.clone()).unwrap();
    let reader = TripleStore::open_with_cache_tier(config, tier.clone()).unwrap();

    let mut conn = writer.connection().unwrap();
    conn.begin().unwrap();
    conn.add_statement(&ex("a"), &ex("p"), &Term::literal("shared"), None).unwrap();
    conn.commit().unwrap();

    let read = reader.connection().unwrap();
    let node = read.lookup_node(&Term::literal("shared")).unwrap().unwrap();
    assert_eq!(node.string_value(), "shared");
    assert!(reader.cache().stats().tier_hits >= 1);
    assert_eq!(
        dump(&reader, &TriplePattern::any()),
        dump(&writer, &TriplePattern::any())
    );
}

#[test]
fn durable_tier_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = store_with(dir.path(), CacheBackend::Durable);
        load_sample(&store);
        assert_eq!(store.cache().stats().tier.as_deref(), Some("durable"));
        store.close();
    }

    let store = store_with(dir.path(), CacheBackend::Durable);
    let conn = store.connection().unwrap();
    let node = conn.lookup_node(&ex("p7")).unwrap().unwrap();
    assert_eq!(node.string_value(), format!("{EX}p7"));
    let stats = store.cache().stats();
    assert!(stats.tier_hits >= 1);
    assert!(stats.tier_entries > 0);
    assert_eq!(dump(&store, &TriplePattern::any()).len(), 58);
}

#[test]
fn namespaces_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = store_with(dir.path(), CacheBackend::Local);
        store.namespaces().set("ex", EX).unwrap();
        store.namespaces().set("foaf", "http://xmlns.com/foaf/0.1/").unwrap();
        store.namespaces().remove("foaf").unwrap();
    }
    let store = store_with(dir.path(), CacheBackend::Local);
    let all = store.namespaces().list().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].prefix, "ex");
    assert_eq!(
        store.namespaces().expand("ex:alice").unwrap().as_deref(),
        Some("http://example.org/alice")
    );
    assert_eq!(
        store.namespaces().compact("http://example.org/bob").unwrap().as_deref(),
        Some("ex:bob")
    );
}

#[test]
fn config_round_trips_through_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kiwi.toml");
    let config = StoreConfig {
        name: "test".into(),
        default_context: Some(format!("{EX}default")),
        ..StoreConfig::sqlite(db_path(dir.path()))
    };
    config.save(&path).unwrap();
    let loaded = StoreConfig::load(&path).unwrap();
    assert_eq!(loaded.name, "test");

    // The configured default context applies to statements added without one.
    let store = TripleStore::open(loaded).unwrap();
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    let t = conn.add_statement(&ex("a"), &ex("p"), &ex("b"), None).unwrap();
    conn.commit().unwrap();
    assert_eq!(t.context.unwrap().term(), Term::uri(format!("{EX}default")));
}
