mod helpers;

use helpers::{engine_with, test_config, SwitchProvider};

/// With the embedding provider down, recall degrades to keyword matching over
/// decrypted content instead of failing the request.
#[tokio::test]
async fn keyword_fallback_serves_recall_when_provider_is_down() {
    let provider = SwitchProvider::up();
    let engine = engine_with(provider.clone(), test_config());

    engine
        .ingest_conversation("U1", "the staging cluster lives in Frankfurt", "msg:1")
        .await
        .unwrap();

    provider.set_down();

    let outcome = engine.recall("U1", "staging cluster", 5).await.unwrap();
    assert!(outcome.degraded, "fallback must be explicit, not silent");
    assert!(outcome.hits[0].content.contains("staging cluster"));

    // Unrelated terms genuinely match nothing
    let outcome = engine.recall("U1", "zebra migration", 5).await.unwrap();
    assert!(outcome.degraded);
    assert!(outcome.hits.is_empty());
}

/// Ingestion fails cleanly while the provider is down and leaves no partial
/// state; once the provider recovers, the same input ingests fine.
#[tokio::test]
async fn conversation_ingest_recovers_with_the_provider() {
    let provider = SwitchProvider::up();
    let engine = engine_with(provider.clone(), test_config());

    provider.set_down();
    let result = engine
        .ingest_conversation("U1", "I prefer window seats", "msg:1")
        .await;
    assert!(result.is_err());
    assert_eq!(engine.stats("U1").await.unwrap().total_items, 0);

    provider.down.store(false, std::sync::atomic::Ordering::SeqCst);
    engine
        .ingest_conversation("U1", "I prefer window seats", "msg:1")
        .await
        .unwrap();
    assert!(engine.stats("U1").await.unwrap().total_items > 0);

    // Semantic recall is back once the provider is reachable
    let outcome = engine.recall("U1", "window seats", 3).await.unwrap();
    assert!(!outcome.degraded);
    assert!(!outcome.hits.is_empty());
}

/// Degraded recall for an owner with no memory space stays empty and calm.
#[tokio::test]
async fn fallback_for_unknown_owner_is_empty() {
    let provider = SwitchProvider::up();
    let engine = engine_with(provider.clone(), test_config());
    provider.set_down();

    let outcome = engine.recall("ghost", "anything at all", 5).await.unwrap();
    assert!(outcome.hits.is_empty());
}
