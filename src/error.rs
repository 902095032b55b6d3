//! Error taxonomy for the memory engine.
//!
//! Structural failures ([`MemoryError::Integrity`], [`MemoryError::StoreInconsistency`])
//! are surfaced and never retried; transient ones ([`MemoryError::EmbeddingUnavailable`])
//! drive retry/fallback behavior in the ingestion pipeline and retrieval engine.

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Error types for the memory engine.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Decryption authentication failed — the envelope was tampered with or
    /// corrupted. The affected item is unreadable; it is never "best-effort"
    /// decoded.
    #[error("integrity failure for item {item_id}: ciphertext authentication failed")]
    Integrity { item_id: String },

    /// The embedding endpoint could not be reached or timed out past all
    /// retries. Retrieval degrades to keyword matching; ingestion marks the
    /// affected document failed.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Ingestion input exceeds the configured payload ceiling. Rejected before
    /// chunking; no partial state is created.
    #[error("payload of {size} bytes exceeds the {limit} byte ingestion limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Ingestion input is empty or whitespace-only.
    #[error("refusing to ingest empty input")]
    EmptyInput,

    /// The metadata store and vector index disagree about an item. The item is
    /// excluded from results until repaired.
    #[error("store inconsistency for item {item_id}: {detail}")]
    StoreInconsistency { item_id: String, detail: String },

    /// No such document for this owner.
    #[error("unknown document: {0}")]
    DocumentUnknown(String),

    /// A background ingestion job was cancelled before completion.
    #[error("ingestion cancelled for document {0}")]
    IngestCancelled(String),

    /// Configuration is missing or invalid. The master secret in particular is
    /// never defaulted.
    #[error("configuration error: {0}")]
    Config(String),

    /// Key derivation or cipher setup failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Underlying SQLite failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure (config file, secret file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant breakage that is a bug, not an operational condition
    /// (poisoned lock, dead task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// `true` for failures worth retrying with backoff (spec §7: transient).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_))
    }
}
