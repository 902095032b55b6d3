#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mnemo::config::MnemoConfig;
use mnemo::crypto::MasterSecret;
use mnemo::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use mnemo::error::{MemoryError, Result};
use mnemo::MemoryEngine;

/// Deterministic embedding: a unit vector at a position derived from the text.
/// Identical text always maps to an identical vector.
pub fn stub_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    let hash: usize = text.bytes().map(|b| b as usize).sum();
    v[hash % EMBEDDING_DIM] = 1.0;
    v
}

/// Always-up deterministic provider.
pub struct StubProvider;

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(stub_embedding(text))
    }
}

/// Provider with a kill switch, for fallback tests.
pub struct SwitchProvider {
    pub down: AtomicBool,
}

impl SwitchProvider {
    pub fn up() -> Arc<Self> {
        Arc::new(Self { down: AtomicBool::new(false) })
    }

    pub fn set_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(MemoryError::EmbeddingUnavailable("provider down".into()));
        }
        Ok(stub_embedding(text))
    }
}

/// Succeeds for the first `ok_limit` calls, then fails permanently.
pub struct FailAfterProvider {
    pub calls: AtomicUsize,
    pub ok_limit: usize,
}

impl FailAfterProvider {
    pub fn new(ok_limit: usize) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), ok_limit })
    }
}

#[async_trait]
impl EmbeddingProvider for FailAfterProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n >= self.ok_limit {
            return Err(MemoryError::EmbeddingUnavailable("endpoint gone".into()));
        }
        Ok(stub_embedding(text))
    }
}

/// Deterministic but slow — gives tests a window to interrupt ingestion.
pub struct SlowProvider {
    pub delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        Ok(stub_embedding(text))
    }
}

/// Config tuned for tests: tiny backoff, no background sweeper.
pub fn test_config() -> MnemoConfig {
    let mut config = MnemoConfig::default();
    config.embedding.backoff_base_ms = 1;
    config.embedding.max_retries = 1;
    config.retention.sweep_interval_secs = 0;
    config
}

/// Engine over an in-memory database with the given provider and config.
pub fn engine_with(provider: Arc<dyn EmbeddingProvider>, config: MnemoConfig) -> MemoryEngine {
    MemoryEngine::with_parts(
        mnemo::db::open_memory_database().unwrap(),
        provider,
        config,
        MasterSecret::new(b"integration test secret".to_vec()),
    )
}

/// Engine with the default test config and an always-up stub provider.
pub fn test_engine() -> MemoryEngine {
    engine_with(Arc::new(StubProvider), test_config())
}

/// A multi-paragraph document that splits into `n` chunks under the default
/// test chunking config.
pub fn paragraphs(n: usize) -> String {
    (0..n)
        .map(|i| format!("Paragraph number {i} carries its own distinct body text."))
        .collect::<Vec<_>>()
        .join("\n\n")
}
