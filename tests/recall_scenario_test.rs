mod helpers;

use helpers::test_engine;

/// Ingesting "I am allergic to peanuts" creates a conversation fact, and a
/// related query for the same owner surfaces it in the top-3.
#[tokio::test]
async fn allergy_fact_is_recalled_for_its_owner() {
    let engine = test_engine();

    let report = engine
        .ingest_conversation("U1", "I am allergic to peanuts", "msg:1001")
        .await
        .unwrap();
    assert!(report.facts >= 1, "a ConversationFact must be extracted");

    let outcome = engine.recall("U1", "food allergies", 3).await.unwrap();
    assert!(!outcome.degraded);
    assert!(
        outcome.hits.iter().any(|h| h.content.contains("peanuts")),
        "the allergy fact must rank in the top-3"
    );
}

/// The same query scoped to a different owner returns nothing related.
#[tokio::test]
async fn allergy_fact_never_leaks_to_another_owner() {
    let engine = test_engine();

    engine
        .ingest_conversation("U1", "I am allergic to peanuts", "msg:1001")
        .await
        .unwrap();
    // U2 has their own unrelated memory space
    engine
        .ingest_conversation("U2", "meeting notes from standup", "msg:2001")
        .await
        .unwrap();

    let outcome = engine.recall("U2", "food allergies", 5).await.unwrap();
    assert!(
        !outcome.hits.iter().any(|h| h.content.contains("peanuts")),
        "owner U2 must never see U1's memories"
    );
}

/// Identical query against an unchanged index returns an identical order.
#[tokio::test]
async fn recall_is_deterministic() {
    let engine = test_engine();
    for i in 0..8 {
        engine
            .ingest_conversation("U1", &format!("distinct note number {i}"), "msg:n")
            .await
            .unwrap();
    }

    let first: Vec<String> = engine
        .recall("U1", "distinct note", 5)
        .await
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.id)
        .collect();
    let second: Vec<String> = engine
        .recall("U1", "distinct note", 5)
        .await
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.id)
        .collect();

    assert_eq!(first, second);
}

/// Recall hits update last_accessed, which feeds LRU eviction.
#[tokio::test]
async fn recall_counts_as_access() {
    let engine = test_engine();
    engine
        .ingest_conversation("U1", "remember the milk", "msg:1")
        .await
        .unwrap();

    engine.recall("U1", "remember the milk", 1).await.unwrap();

    let snapshot = engine.export("U1").await.unwrap();
    assert!(
        snapshot.items.iter().any(|item| item.last_accessed.is_some()),
        "a recall hit must bump last_accessed"
    );
}
