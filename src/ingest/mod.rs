//! The ingestion pipeline.
//!
//! Turns raw text into encrypted, embedded memory items: validate → chunk →
//! extract facts → summarize → embed (with bounded retries) → persist, with a
//! retention pass after every write. Conversation turns run inline; documents
//! run as cancellable background jobs that report progress over a message
//! channel.
//!
//! Embedding is the only external call and the only suspension point. A
//! permanent embedding failure mid-document keeps the chunks already persisted
//! and marks the document `Failed` — partial results are reported, never
//! silently dropped. Cancellation (a wipe arriving mid-ingestion) stops chunk
//! processing and discards the cancelled document's partial items.

pub mod chunk;
pub mod facts;
pub mod summarize;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MnemoConfig;
use crate::crypto::{KeyCache, OwnerCipher};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::index::VectorIndex;
use crate::memory::types::{
    DocumentStatus, ItemPayload, MemoryKind, RetentionPolicy, SourceKind,
};
use crate::memory::{retention, store};

/// Progress and completion notifications from ingestion, consumed by the
/// engine's retention loop and the front-end status query.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    ConversationStored {
        owner_id: String,
        items: usize,
    },
    DocumentCompleted {
        owner_id: String,
        document_id: String,
        chunks: usize,
    },
    DocumentFailed {
        owner_id: String,
        document_id: String,
        stored_chunks: usize,
        error: String,
    },
    DocumentCancelled {
        owner_id: String,
        document_id: String,
        discarded: usize,
    },
}

/// What a conversation ingest produced.
#[derive(Debug)]
pub struct IngestReport {
    pub item_ids: Vec<String>,
    pub chunks: usize,
    pub facts: usize,
}

/// Handles shared by every pipeline run.
#[derive(Clone)]
pub struct PipelineShared {
    pub conn: Arc<Mutex<Connection>>,
    pub index: Arc<dyn VectorIndex>,
    pub keys: Arc<Mutex<KeyCache>>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub config: Arc<MnemoConfig>,
}

impl PipelineShared {
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoryError::Internal("connection lock poisoned".into()))
    }

    fn acquire_cipher(&self, owner_id: &str) -> Result<OwnerCipher> {
        let salt = {
            let conn = self.lock_conn()?;
            store::ensure_owner(&conn, owner_id)?
        };
        self.keys
            .lock()
            .map_err(|_| MemoryError::Internal("key cache lock poisoned".into()))?
            .acquire(owner_id, &salt)
    }

    fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_items: self.config.retention.max_items,
            min_retain_age_secs: self.config.retention.min_retain_age_secs,
        }
    }
}

/// A background document-ingestion job.
pub struct DocumentJob {
    pub shared: PipelineShared,
    pub events: UnboundedSender<IngestEvent>,
    pub cancel: CancellationToken,
    pub owner_id: String,
    pub document_id: String,
    pub text: String,
}

/// Reject empty and oversized payloads before any state is created.
pub fn validate_input(text: &str, max_payload_bytes: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(MemoryError::EmptyInput);
    }
    if text.len() > max_payload_bytes {
        return Err(MemoryError::PayloadTooLarge {
            size: text.len(),
            limit: max_payload_bytes,
        });
    }
    Ok(())
}

/// Embed with exponential backoff on transient failures. Structural errors
/// propagate immediately.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    max_retries: u32,
    backoff_base_ms: u64,
) -> Result<Vec<f32>> {
    let mut attempt = 0u32;
    loop {
        match provider.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = backoff_base_ms.saturating_mul(1 << attempt);
                warn!(attempt, delay_ms = delay, error = %e, "embedding retry");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Inline ingestion of a conversation turn: chunks of the transcript plus
/// extracted facts. Everything is embedded before anything is persisted, so a
/// provider failure leaves no partial state.
pub async fn run_conversation_ingest(
    shared: &PipelineShared,
    owner_id: &str,
    text: &str,
    source_ref: &str,
) -> Result<IngestReport> {
    validate_input(text, shared.config.ingestion.max_payload_bytes)?;

    let cipher = shared.acquire_cipher(owner_id)?;
    let chunks = chunk::split_chunks(text, shared.config.ingestion.max_chunk_chars);
    let extracted = facts::extract_facts(text);

    // (kind, payload) pairs, embedded in order
    let mut staged: Vec<(MemoryKind, ItemPayload)> = Vec::new();
    for chunk_text in &chunks {
        staged.push((MemoryKind::DocumentChunk, ItemPayload::text(chunk_text.clone())));
    }
    for fact in &extracted {
        staged.push((
            MemoryKind::ConversationFact,
            ItemPayload::fact(fact.key, fact.value.clone(), fact.confidence),
        ));
    }

    let retries = shared.config.embedding.max_retries;
    let backoff = shared.config.embedding.backoff_base_ms;
    let mut embeddings = Vec::with_capacity(staged.len());
    for (_, payload) in &staged {
        embeddings.push(
            embed_with_retry(shared.provider.as_ref(), &payload.content, retries, backoff)
                .await?,
        );
    }

    let policy = shared.retention_policy();
    let mut item_ids = Vec::with_capacity(staged.len());
    {
        let mut conn = shared.lock_conn()?;
        for ((kind, payload), embedding) in staged.iter().zip(&embeddings) {
            let id = store::persist_item(
                &mut conn,
                shared.index.as_ref(),
                &cipher,
                &store::NewItem {
                    owner_id,
                    kind: *kind,
                    payload,
                    source_kind: SourceKind::Conversation,
                    source_ref,
                    document_id: None,
                    embedding,
                },
            )?;
            item_ids.push(id);
        }
        retention::enforce_owner(&mut conn, shared.index.as_ref(), owner_id, &policy)?;
    }

    info!(
        owner = %owner_id,
        chunks = chunks.len(),
        facts = extracted.len(),
        "conversation ingested"
    );
    Ok(IngestReport {
        item_ids,
        chunks: chunks.len(),
        facts: extracted.len(),
    })
}

/// Background document pipeline. Returns the document's final status;
/// cancellation surfaces as [`MemoryError::IngestCancelled`] after partial
/// items are discarded.
pub async fn run_document_pipeline(job: DocumentJob) -> Result<DocumentStatus> {
    let DocumentJob { shared, events, cancel, owner_id, document_id, text } = job;

    {
        let conn = shared.lock_conn()?;
        store::set_document_status(&conn, &document_id, DocumentStatus::Chunking)?;
    }
    let chunks = chunk::split_chunks(&text, shared.config.ingestion.max_chunk_chars);
    let summary_text = (text.trim().len() > shared.config.ingestion.summary_threshold_chars)
        .then(|| summarize::extract_summary(&text, shared.config.ingestion.summary_max_chars))
        .filter(|s| !s.is_empty());

    {
        let conn = shared.lock_conn()?;
        store::set_document_status(&conn, &document_id, DocumentStatus::Embedding)?;
    }

    let cipher = shared.acquire_cipher(&owner_id)?;
    let policy = shared.retention_policy();
    let retries = shared.config.embedding.max_retries;
    let backoff = shared.config.embedding.backoff_base_ms;

    let mut stored = 0usize;
    let mut staged: Vec<(MemoryKind, String)> =
        chunks.into_iter().map(|c| (MemoryKind::DocumentChunk, c)).collect();
    if let Some(summary) = summary_text {
        staged.push((MemoryKind::Summary, summary));
    }

    for (kind, content) in staged {
        if cancel.is_cancelled() {
            return discard_cancelled(&shared, &events, &owner_id, &document_id);
        }

        let embedding =
            match embed_with_retry(shared.provider.as_ref(), &content, retries, backoff).await {
                Ok(vector) => vector,
                Err(e) if e.is_transient() => {
                    // Permanent provider failure: chunks already stored stay,
                    // the document is reported failed
                    let conn = shared.lock_conn()?;
                    store::set_document_status(&conn, &document_id, DocumentStatus::Failed)?;
                    drop(conn);
                    warn!(
                        owner = %owner_id,
                        doc = %document_id,
                        stored,
                        error = %e,
                        "document ingestion failed at embedding"
                    );
                    let _ = events.send(IngestEvent::DocumentFailed {
                        owner_id,
                        document_id,
                        stored_chunks: stored,
                        error: e.to_string(),
                    });
                    return Ok(DocumentStatus::Failed);
                }
                Err(e) => return Err(e),
            };

        let payload = ItemPayload::text(content);
        {
            let mut conn = shared.lock_conn()?;
            store::persist_item(
                &mut conn,
                shared.index.as_ref(),
                &cipher,
                &store::NewItem {
                    owner_id: &owner_id,
                    kind,
                    payload: &payload,
                    source_kind: SourceKind::Document,
                    source_ref: &document_id,
                    document_id: Some(&document_id),
                    embedding: &embedding,
                },
            )?;
            retention::enforce_owner(&mut conn, shared.index.as_ref(), &owner_id, &policy)?;
        }
        if kind == MemoryKind::DocumentChunk {
            stored += 1;
        }
    }

    {
        let conn = shared.lock_conn()?;
        store::set_document_status(&conn, &document_id, DocumentStatus::Stored)?;
    }
    info!(owner = %owner_id, doc = %document_id, chunks = stored, "document stored");
    let _ = events.send(IngestEvent::DocumentCompleted {
        owner_id,
        document_id,
        chunks: stored,
    });
    Ok(DocumentStatus::Stored)
}

/// Cancellation cleanup: drop the cancelled document's partial items and its
/// record from both stores.
fn discard_cancelled(
    shared: &PipelineShared,
    events: &UnboundedSender<IngestEvent>,
    owner_id: &str,
    document_id: &str,
) -> Result<DocumentStatus> {
    let discarded = {
        let mut conn = shared.lock_conn()?;
        let discarded =
            store::delete_document_items(&mut conn, shared.index.as_ref(), owner_id, document_id)?;
        conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND owner_id = ?2",
            rusqlite::params![document_id, owner_id],
        )?;
        discarded
    };
    info!(owner = %owner_id, doc = %document_id, discarded, "document ingestion cancelled");
    let _ = events.send(IngestEvent::DocumentCancelled {
        owner_id: owner_id.to_string(),
        document_id: document_id.to_string(),
        discarded,
    });
    Err(MemoryError::IngestCancelled(document_id.to_string()))
}
