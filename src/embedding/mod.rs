//! Text-to-vector embedding contract.
//!
//! Provides the [`EmbeddingProvider`] trait and a remote implementation that
//! calls an OpenAI-compatible `/embeddings` endpoint. The engine depends only
//! on this contract: vectors are L2-normalized and exactly [`EMBEDDING_DIM`]
//! wide. A provider failure surfaces as
//! [`MemoryError::EmbeddingUnavailable`](crate::error::MemoryError::EmbeddingUnavailable),
//! which callers treat as transient (retry during ingestion, keyword fallback
//! during retrieval).

pub mod remote;

use async_trait::async_trait;

use crate::error::Result;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions and must bound every call with a deadline — the engine never
/// waits indefinitely on a provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for
    /// batched inference.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    let provider = remote::RemoteEmbeddingProvider::new(config)?;
    Ok(Box::new(provider))
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
