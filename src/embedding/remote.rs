//! Remote embedding provider for OpenAI-compatible endpoints.
//!
//! POSTs `{model, input}` to `<endpoint>/embeddings` and parses the standard
//! `{data: [{embedding: [...]}]}` response. Every request carries the
//! configured deadline; retry policy is the caller's concern (the ingestion
//! pipeline retries with backoff, retrieval falls back to keyword matching).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{MemoryError, Result};

pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Config(format!("bad http client config: {e}")))?;

        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut req = self.client.post(&self.url).json(&json!({
            "model": self.model,
            "input": inputs,
        }));
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "endpoint returned {status}"
            )));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::EmbeddingUnavailable(format!("bad response body: {e}")))?;

        if body.data.len() != inputs.len() {
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                inputs.len(),
                body.data.len()
            )));
        }

        body.data
            .into_iter()
            .map(|row| normalize_checked(row.embedding))
            .collect()
    }
}

/// Validate dimensions and L2-normalize a provider vector.
fn normalize_checked(mut v: Vec<f32>) -> Result<Vec<f32>> {
    if v.len() != EMBEDDING_DIM {
        return Err(MemoryError::EmbeddingUnavailable(format!(
            "provider returned {} dimensions, expected {EMBEDDING_DIM}",
            v.len()
        )));
    }
    l2_normalize(&mut v);
    Ok(v)
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}
