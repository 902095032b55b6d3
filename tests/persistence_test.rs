mod helpers;

use std::sync::Arc;

use mnemo::crypto::MasterSecret;
use mnemo::MemoryEngine;

/// The one-to-one item correspondence and the per-owner key derivation both
/// survive a restart: a fresh engine over the same database file (and the
/// same master secret) decrypts and recalls what the previous one stored.
#[tokio::test]
async fn memory_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memory.db");

    {
        let conn = mnemo::db::open_database(&db_path).unwrap();
        let engine = MemoryEngine::with_parts(
            conn,
            Arc::new(helpers::StubProvider),
            helpers::test_config(),
            MasterSecret::new(b"stable master secret".to_vec()),
        );
        engine
            .ingest_conversation("U1", "the wifi password is hunter2", "msg:1")
            .await
            .unwrap();
    }

    // Reopen: new connection, new engine, same secret
    let conn = mnemo::db::open_database(&db_path).unwrap();
    let engine = MemoryEngine::with_parts(
        conn,
        Arc::new(helpers::StubProvider),
        helpers::test_config(),
        MasterSecret::new(b"stable master secret".to_vec()),
    );

    let snapshot = engine.export("U1").await.unwrap();
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].payload.content, "the wifi password is hunter2");
    assert!(snapshot.unreadable_items.is_empty());

    let outcome = engine.recall("U1", "the wifi password is hunter2", 3).await.unwrap();
    assert!(!outcome.hits.is_empty());
}

/// The wrong master secret cannot read anything: every item shows up as
/// unreadable instead of decrypting to garbage.
#[tokio::test]
async fn wrong_master_secret_reads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memory.db");

    {
        let conn = mnemo::db::open_database(&db_path).unwrap();
        let engine = MemoryEngine::with_parts(
            conn,
            Arc::new(helpers::StubProvider),
            helpers::test_config(),
            MasterSecret::new(b"the real secret".to_vec()),
        );
        engine
            .ingest_conversation("U1", "classified contents", "msg:1")
            .await
            .unwrap();
    }

    let conn = mnemo::db::open_database(&db_path).unwrap();
    let engine = MemoryEngine::with_parts(
        conn,
        Arc::new(helpers::StubProvider),
        helpers::test_config(),
        MasterSecret::new(b"an impostor secret".to_vec()),
    );

    let snapshot = engine.export("U1").await.unwrap();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.unreadable_items.len(), 1);
}
