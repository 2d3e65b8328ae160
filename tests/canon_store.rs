//! Canon system behavior: creation, race serialization, persistence and
//! schema migration.

use std::sync::Arc;
use std::thread;

use realign::{
    CanonError, CanonStore, CanonSystem, DirCanonStore, MemoryCanonStore, StoredCanon,
    SCHEMA_VERSION,
};

const CANON_SOURCE: &str = "fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }";

#[test]
fn missing_canon_without_supplied_source_fails() {
    let system = CanonSystem::new(Arc::new(MemoryCanonStore::new()));
    let err = system
        .get_or_create("unknown-task", None)
        .expect_err("nothing stored and nothing supplied");
    assert!(matches!(err, CanonError::NotFound(_)));
}

#[test]
fn supplied_source_creates_and_later_loads() {
    let system = CanonSystem::new(Arc::new(MemoryCanonStore::new()));
    let created = system
        .get_or_create("task-1", Some(CANON_SOURCE))
        .expect("creation must succeed");
    let loaded = system
        .get_or_create("task-1", None)
        .expect("stored canon must load without a supplied source");
    assert_eq!(created.properties.ast_hash, loaded.properties.ast_hash);
}

#[test]
fn second_supplier_adopts_the_first_canon() {
    let system = CanonSystem::new(Arc::new(MemoryCanonStore::new()));
    let winner = system
        .get_or_create("task-1", Some(CANON_SOURCE))
        .expect("first creation must succeed");
    let loser = system
        .get_or_create("task-1", Some("fn f(n: i64) -> i64 { n * 3 }"))
        .expect("second call must succeed");
    assert_eq!(winner.properties.ast_hash, loser.properties.ast_hash);
}

#[test]
fn racing_creators_agree_on_one_canon() {
    let system = Arc::new(CanonSystem::new(Arc::new(MemoryCanonStore::new())));
    let sources = [
        "fn f(n: i64) -> i64 { n }",
        "fn f(n: i64) -> i64 { n + 1 }",
        "fn f(n: i64) -> i64 { n + 2 }",
        "fn f(n: i64) -> i64 { n + 3 }",
    ];
    let mut hashes: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let system = Arc::clone(&system);
                let source = sources[i % sources.len()];
                scope.spawn(move || {
                    system
                        .get_or_create("raced-task", Some(source))
                        .expect("racing creation must not fail")
                        .properties
                        .ast_hash
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("no thread may panic"))
            .collect()
    });
    hashes.dedup();
    assert_eq!(hashes.len(), 1, "divergent canons persisted for one task");
}

#[test]
fn dir_store_persists_across_instances() {
    let dir = tempfile::tempdir().expect("temp dir");
    {
        let store = Arc::new(DirCanonStore::new(dir.path()).expect("store must open"));
        let system = CanonSystem::new(store);
        system
            .get_or_create("persisted", Some(CANON_SOURCE))
            .expect("creation must succeed");
    }
    let store = Arc::new(DirCanonStore::new(dir.path()).expect("store must reopen"));
    let system = CanonSystem::new(store);
    let loaded = system
        .get_or_create("persisted", None)
        .expect("record must survive the first instance");
    assert_eq!(loaded.task_id, "persisted");
}

#[test]
fn dir_store_create_is_first_writer_wins() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = DirCanonStore::new(dir.path()).expect("store must open");
    let first = record("task", CANON_SOURCE);
    let second = record("task", "fn f(n: i64) -> i64 { n * 9 }");
    store.create(first.clone()).expect("first create succeeds");
    let stored = store.create(second).expect("second create returns the winner");
    assert_eq!(stored.source, first.source);
}

#[test]
fn stale_schema_records_are_reextracted_on_load() {
    let store: Arc<dyn CanonStore> = Arc::new(MemoryCanonStore::new());
    let mut stale = record("old-task", CANON_SOURCE);
    stale.schema_version = SCHEMA_VERSION - 1;
    store.replace(stale).expect("seeding the store");

    let system = CanonSystem::new(Arc::clone(&store));
    let canon = system
        .get_or_create("old-task", None)
        .expect("stale record must hydrate");
    assert_eq!(canon.properties.schema_version, SCHEMA_VERSION);

    let migrated = store
        .get("old-task")
        .expect("store must read")
        .expect("record must still exist");
    assert_eq!(migrated.schema_version, SCHEMA_VERSION);
}

fn record(task_id: &str, source: &str) -> StoredCanon {
    let properties =
        realign::extract_properties_from_source(source).expect("record source must parse");
    StoredCanon {
        schema_version: SCHEMA_VERSION,
        task_id: task_id.to_string(),
        source: source.to_string(),
        properties,
    }
}
