//! The owner-scoped engine facade.
//!
//! [`MemoryEngine`] owns the database connection, vector index, key cache,
//! and embedding provider, and exposes the user-facing operations: ingest,
//! recall, list, stats, export, forget, wipe, sweep.
//!
//! Concurrency model: every owner is an independent unit. Writes for one owner
//! (ingestion, forget, wipe) serialize on a per-owner async lock; reads run
//! concurrently and always see consistent snapshots because item writes are
//! single transactions across both stores. Document ingestion runs as a
//! cancellable background task; its progress events feed a retention loop, and
//! a periodic sweep enforces capacity and purges idle key material.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MnemoConfig;
use crate::crypto::{KeyCache, MasterSecret, OwnerCipher};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::index::{SqliteVecIndex, VectorIndex};
use crate::ingest::{self, DocumentJob, IngestEvent, IngestReport, PipelineShared};
use crate::memory::export::ExportSnapshot;
use crate::memory::forget::WipeReport;
use crate::memory::retrieval::{self, RankingParams, RecallHit};
use crate::memory::stats::{MemoryPreview, OwnerStats};
use crate::memory::types::{DocumentStatus, RetentionPolicy};
use crate::memory::{export, forget, now_rfc3339, retention, stats, store};

/// Result of a recall request.
#[derive(Debug, Serialize)]
pub struct RecallOutcome {
    pub hits: Vec<RecallHit>,
    /// `true` when the embedding provider was unreachable and results came
    /// from the keyword fallback.
    pub degraded: bool,
}

/// Result of one sweep pass.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub owners_checked: usize,
    pub items_evicted: usize,
    pub keys_purged: usize,
}

struct DocumentTask {
    owner_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<DocumentStatus>>,
}

struct EngineInner {
    shared: PipelineShared,
    owner_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    tasks: Mutex<HashMap<String, DocumentTask>>,
    events_tx: UnboundedSender<IngestEvent>,
}

/// The per-user encrypted memory engine. Cheap to clone.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    /// Open the engine from configuration: resolve the master secret, open the
    /// database, and connect the remote embedding provider. Must be called
    /// inside a tokio runtime.
    pub fn open(config: MnemoConfig) -> anyhow::Result<Self> {
        let master = config.resolve_master_secret()?;
        let conn = crate::db::open_database(config.resolved_db_path())?;
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::from(crate::embedding::create_provider(&config.embedding)?);
        Ok(Self::with_parts(conn, provider, config, master))
    }

    /// Assemble an engine from parts (tests use an in-memory database and a
    /// stub provider). Must be called inside a tokio runtime.
    pub fn with_parts(
        conn: Connection,
        provider: Arc<dyn EmbeddingProvider>,
        config: MnemoConfig,
        master: MasterSecret,
    ) -> Self {
        let key_idle = Duration::from_secs(config.security.key_idle_secs);
        let sweep_interval = config.retention.sweep_interval_secs;
        let shared = PipelineShared {
            conn: Arc::new(Mutex::new(conn)),
            index: Arc::new(SqliteVecIndex),
            keys: Arc::new(Mutex::new(KeyCache::new(master, key_idle))),
            provider,
            config: Arc::new(config),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            inner: Arc::new(EngineInner {
                shared: shared.clone(),
                owner_locks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                events_tx,
            }),
        };

        tokio::spawn(retention_loop(shared, events_rx));
        if sweep_interval > 0 {
            tokio::spawn(sweep_loop(
                Arc::downgrade(&engine.inner),
                Duration::from_secs(sweep_interval),
            ));
        }
        engine
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Ingest a conversation turn inline: transcript chunks plus extracted
    /// facts, embedded and persisted under the owner's write lock.
    pub async fn ingest_conversation(
        &self,
        owner_id: &str,
        text: &str,
        source_ref: &str,
    ) -> Result<IngestReport> {
        let lock = self.owner_lock(owner_id)?;
        let _guard = lock.lock().await;

        let report =
            ingest::run_conversation_ingest(&self.inner.shared, owner_id, text, source_ref)
                .await?;
        let _ = self.inner.events_tx.send(IngestEvent::ConversationStored {
            owner_id: owner_id.to_string(),
            items: report.item_ids.len(),
        });
        Ok(report)
    }

    /// Start ingesting a document in the background. Validation happens up
    /// front (empty/oversized input fails here, creating nothing); the
    /// returned document id can be polled with [`Self::document_status`] or
    /// awaited with [`Self::wait_document`].
    pub async fn ingest_document(
        &self,
        owner_id: &str,
        name: &str,
        text: String,
    ) -> Result<String> {
        ingest::validate_input(&text, self.inner.shared.config.ingestion.max_payload_bytes)?;

        let document_id = {
            let conn = self.lock_conn()?;
            store::ensure_owner(&conn, owner_id)?;
            store::create_document(&conn, owner_id, name, text.len() as u64)?
        };

        let cancel = CancellationToken::new();
        let job = DocumentJob {
            shared: self.inner.shared.clone(),
            events: self.inner.events_tx.clone(),
            cancel: cancel.clone(),
            owner_id: owner_id.to_string(),
            document_id: document_id.clone(),
            text,
        };

        let owner = owner_id.to_string();
        let lock = self.owner_lock(owner_id)?;
        let handle = tokio::spawn(async move {
            // Writes within the job serialize with the owner's other writes
            let _guard = lock.lock().await;
            ingest::run_document_pipeline(job).await
        });

        self.inner
            .tasks
            .lock()
            .map_err(|_| MemoryError::Internal("task registry lock poisoned".into()))?
            .insert(
                document_id.clone(),
                DocumentTask { owner_id: owner, cancel, handle },
            );

        info!(owner = %owner_id, doc = %document_id, "document ingestion scheduled");
        Ok(document_id)
    }

    /// Await a background ingestion job and return the document's final
    /// status. Falls back to the stored status if the job already finished and
    /// was pruned.
    pub async fn wait_document(&self, owner_id: &str, document_id: &str) -> Result<DocumentStatus> {
        let task = self
            .inner
            .tasks
            .lock()
            .map_err(|_| MemoryError::Internal("task registry lock poisoned".into()))?
            .remove(document_id);

        match task {
            Some(task) => match task.handle.await {
                Ok(result) => result,
                Err(e) => Err(MemoryError::Internal(format!("ingestion task died: {e}"))),
            },
            None => self.document_status(owner_id, document_id).await,
        }
    }

    /// Current lifecycle status of a document.
    pub async fn document_status(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<DocumentStatus> {
        let conn = self.lock_conn()?;
        store::get_document(&conn, owner_id, document_id)?
            .map(|doc| doc.status)
            .ok_or_else(|| MemoryError::DocumentUnknown(document_id.to_string()))
    }

    // ── Retrieval ─────────────────────────────────────────────────────────────

    /// Ranked recall. Embeds the query and searches the owner's index
    /// partition; if the provider is unreachable, degrades to keyword matching
    /// over decrypted content rather than failing the request.
    pub async fn recall(&self, owner_id: &str, query_text: &str, k: usize) -> Result<RecallOutcome> {
        let k = k.min(self.inner.shared.config.retrieval.max_k);
        let Some(cipher) = self.cipher_if_known(owner_id)? else {
            return Ok(RecallOutcome { hits: Vec::new(), degraded: false });
        };

        match self.inner.shared.provider.embed(query_text).await {
            Ok(query_embedding) => {
                let ranking = self.ranking_params();
                let conn = self.lock_conn()?;
                let hits = retrieval::retrieve_semantic(
                    &conn,
                    self.inner.shared.index.as_ref(),
                    &cipher,
                    owner_id,
                    &query_embedding,
                    k,
                    &ranking,
                )?;
                Ok(RecallOutcome { hits, degraded: false })
            }
            Err(e) if e.is_transient() => {
                warn!(owner = %owner_id, error = %e, "embedding down, keyword fallback");
                let conn = self.lock_conn()?;
                let hits = retrieval::retrieve_keyword(
                    &conn,
                    &cipher,
                    owner_id,
                    query_text,
                    k,
                    self.inner.shared.config.retrieval.fallback_scan_limit,
                )?;
                Ok(RecallOutcome { hits, degraded: true })
            }
            Err(e) => Err(e),
        }
    }

    // ── User-facing operations ────────────────────────────────────────────────

    /// Overview of the owner's newest items with decrypted previews.
    pub async fn list_memory(&self, owner_id: &str, limit: usize) -> Result<Vec<MemoryPreview>> {
        let Some(cipher) = self.cipher_if_known(owner_id)? else {
            return Ok(Vec::new());
        };
        let conn = self.lock_conn()?;
        stats::list_memory(&conn, &cipher, owner_id, limit)
    }

    /// Stored-item counters for an owner.
    pub async fn stats(&self, owner_id: &str) -> Result<OwnerStats> {
        let conn = self.lock_conn()?;
        stats::owner_stats(&conn, owner_id)
    }

    /// Full decrypted snapshot for user download. Read-only.
    pub async fn export(&self, owner_id: &str) -> Result<ExportSnapshot> {
        let Some(cipher) = self.cipher_if_known(owner_id)? else {
            return Ok(ExportSnapshot {
                owner_id: owner_id.to_string(),
                exported_at: now_rfc3339(),
                items: Vec::new(),
                documents: Vec::new(),
                unreadable_items: Vec::new(),
            });
        };
        let conn = self.lock_conn()?;
        export::export_owner(&conn, &cipher, owner_id)
    }

    /// Delete the owner's newest `n` conversational items.
    pub async fn forget_recent(&self, owner_id: &str, n: usize) -> Result<usize> {
        let lock = self.owner_lock(owner_id)?;
        let _guard = lock.lock().await;
        let mut conn = self.lock_conn()?;
        forget::forget_recent(&mut conn, self.inner.shared.index.as_ref(), owner_id, n)
    }

    /// Destroy the owner's memory space: cancel in-flight ingestion, then
    /// delete items, documents, audit rows, the KDF salt, and any cached key
    /// material. Irreversible.
    pub async fn wipe(&self, owner_id: &str) -> Result<WipeReport> {
        // Cancel this owner's background jobs and wait them out
        let doomed: Vec<DocumentTask> = {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .map_err(|_| MemoryError::Internal("task registry lock poisoned".into()))?;
            let ids: Vec<String> = tasks
                .iter()
                .filter(|(_, t)| t.owner_id == owner_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| tasks.remove(&id)).collect()
        };
        for task in doomed {
            task.cancel.cancel();
            let _ = task.handle.await;
        }

        let lock = self.owner_lock(owner_id)?;
        let _guard = lock.lock().await;

        let report = {
            let mut conn = self.lock_conn()?;
            forget::wipe_owner(&mut conn, self.inner.shared.index.as_ref(), owner_id)?
        };
        self.inner
            .shared
            .keys
            .lock()
            .map_err(|_| MemoryError::Internal("key cache lock poisoned".into()))?
            .release(owner_id);
        Ok(report)
    }

    /// One retention pass over every owner plus a key-cache purge. Also runs
    /// periodically in the background.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let policy = self.retention_policy();
        let owners = {
            let conn = self.lock_conn()?;
            store::all_owner_ids(&conn)?
        };

        let mut items_evicted = 0;
        for owner_id in &owners {
            let lock = self.owner_lock(owner_id)?;
            let _guard = lock.lock().await;
            let mut conn = self.lock_conn()?;
            let report = retention::enforce_owner(
                &mut conn,
                self.inner.shared.index.as_ref(),
                owner_id,
                &policy,
            )?;
            items_evicted += report.evicted;

            // Both stores must agree on what exists for this owner
            let metadata_count = retention::count_items(&conn, owner_id)? as u64;
            let index_count = self.inner.shared.index.count_owner(&conn, owner_id)?;
            if metadata_count != index_count {
                warn!(
                    owner = %owner_id,
                    metadata = metadata_count,
                    index = index_count,
                    "store divergence detected during sweep"
                );
            }
        }

        let keys_purged = self
            .inner
            .shared
            .keys
            .lock()
            .map_err(|_| MemoryError::Internal("key cache lock poisoned".into()))?
            .purge_idle();

        // Drop registry entries for jobs that already ran to completion
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.retain(|_, task| !task.handle.is_finished());
        }

        debug!(owners = owners.len(), evicted = items_evicted, keys_purged, "sweep complete");
        Ok(SweepReport {
            owners_checked: owners.len(),
            items_evicted,
            keys_purged,
        })
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .shared
            .conn
            .lock()
            .map_err(|_| MemoryError::Internal("connection lock poisoned".into()))
    }

    /// Per-owner write lock, created on first use.
    fn owner_lock(&self, owner_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .inner
            .owner_locks
            .lock()
            .map_err(|_| MemoryError::Internal("owner lock table poisoned".into()))?;
        Ok(locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Cipher for an owner that already has a memory space; `None` otherwise.
    fn cipher_if_known(&self, owner_id: &str) -> Result<Option<OwnerCipher>> {
        let salt = {
            let conn = self.lock_conn()?;
            store::owner_salt(&conn, owner_id)?
        };
        let Some(salt) = salt else { return Ok(None) };
        let cipher = self
            .inner
            .shared
            .keys
            .lock()
            .map_err(|_| MemoryError::Internal("key cache lock poisoned".into()))?
            .acquire(owner_id, &salt)?;
        Ok(Some(cipher))
    }

    fn ranking_params(&self) -> RankingParams {
        let cfg = &self.inner.shared.config.retrieval;
        RankingParams {
            similarity_weight: cfg.similarity_weight,
            recency_weight: cfg.recency_weight,
            recency_half_life_secs: cfg.recency_half_life_secs,
        }
    }

    fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_items: self.inner.shared.config.retention.max_items,
            min_retain_age_secs: self.inner.shared.config.retention.min_retain_age_secs,
        }
    }
}

/// The retention manager's reactive half: consumes ingestion events and runs
/// an enforcement pass for the owner that just wrote. (The write paths also
/// enforce inline, which is what upholds the capacity invariant; this loop
/// catches anything scheduled around them.)
async fn retention_loop(
    shared: PipelineShared,
    mut events_rx: mpsc::UnboundedReceiver<IngestEvent>,
) {
    let policy = RetentionPolicy {
        max_items: shared.config.retention.max_items,
        min_retain_age_secs: shared.config.retention.min_retain_age_secs,
    };
    while let Some(event) = events_rx.recv().await {
        let owner_id = match &event {
            IngestEvent::ConversationStored { owner_id, .. }
            | IngestEvent::DocumentCompleted { owner_id, .. } => Some(owner_id.clone()),
            IngestEvent::DocumentFailed { owner_id, document_id, stored_chunks, error } => {
                warn!(
                    owner = %owner_id,
                    doc = %document_id,
                    stored = stored_chunks,
                    error = %error,
                    "document ingestion reported failure"
                );
                Some(owner_id.clone())
            }
            IngestEvent::DocumentCancelled { .. } => None,
        };
        if let Some(owner_id) = owner_id {
            let Ok(mut conn) = shared.conn.lock() else { break };
            if let Err(e) =
                retention::enforce_owner(&mut conn, shared.index.as_ref(), &owner_id, &policy)
            {
                warn!(owner = %owner_id, error = %e, "retention pass failed");
            }
        }
    }
}

/// Periodic sweep: capacity enforcement and key-cache purging. Holds only a
/// weak handle so a dropped engine shuts the loop down.
async fn sweep_loop(inner: Weak<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        let engine = MemoryEngine { inner };
        if let Err(e) = engine.sweep().await {
            warn!(error = %e, "periodic sweep failed");
        }
    }
}
