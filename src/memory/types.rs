//! Core memory type definitions.
//!
//! Defines [`MemoryKind`] (the closed set of stored-item categories),
//! [`SourceKind`] (provenance), [`ItemPayload`] (the plaintext that gets
//! sealed into an envelope), [`MemoryItem`] (a decrypted record), and
//! [`Document`]/[`DocumentStatus`] (ingestion units).

use serde::{Deserialize, Serialize};

/// The three memory item categories. Closed set — every consumer matches
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A discrete user-asserted fact (preference, identity detail) extracted
    /// from conversation.
    ConversationFact,
    /// A bounded segment of raw text — a document chunk or a verbatim
    /// conversation turn.
    DocumentChunk,
    /// A condensed summary of a long document, for cheap high-level recall.
    Summary,
}

impl MemoryKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationFact => "conversation_fact",
            Self::DocumentChunk => "document_chunk",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation_fact" => Ok(Self::ConversationFact),
            "document_chunk" => Ok(Self::DocumentChunk),
            "summary" => Ok(Self::Summary),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// Where an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A conversation message (source_ref is the message reference).
    Conversation,
    /// A document-ingestion job (source_ref is the document id).
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Document => "document",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "document" => Ok(Self::Document),
            _ => Err(format!("unknown source kind: {s}")),
        }
    }
}

/// The plaintext payload sealed into an item's envelope. Never persisted
/// outside the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemPayload {
    /// The text this item represents.
    pub content: String,
    /// Fact key (`name`, `language`, `preference`, ...) for conversation
    /// facts; `None` for chunks and summaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,
    /// Extraction confidence for conversation facts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ItemPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), fact_key: None, confidence: None }
    }

    pub fn fact(key: impl Into<String>, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            fact_key: Some(key.into()),
            confidence: Some(confidence),
        }
    }
}

/// A decrypted memory record. Exists only in memory — the stored form keeps
/// the payload sealed.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryItem {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// The isolated memory space this item belongs to.
    pub owner_id: String,
    pub kind: MemoryKind,
    /// Decrypted payload.
    pub payload: ItemPayload,
    pub source_kind: SourceKind,
    /// Message reference or document id, depending on `source_kind`.
    pub source_ref: String,
    /// Owning document for document chunks and summaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 timestamp of the last recall hit, or `None` if never recalled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
}

/// Lifecycle state of an ingestion unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Chunking,
    Embedding,
    Stored,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Stored => "stored",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "chunking" => Ok(Self::Chunking),
            "embedding" => Ok(Self::Embedding),
            "stored" => Ok(Self::Stored),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown document status: {s}")),
        }
    }
}

/// An ingestion unit — an uploaded file or a conversation batch.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub raw_size_bytes: u64,
    pub status: DocumentStatus,
    /// Chunks successfully persisted for this document.
    pub chunk_count: u32,
    /// Chunks later removed by the retention manager. The document row
    /// survives chunk eviction; this counter is its bookkeeping.
    pub evicted_chunks: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-owner retention bounds.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Item capacity; exceeding it triggers LRU eviction.
    pub max_items: usize,
    /// Items younger than this many seconds are never evicted (explicit wipe
    /// excepted).
    pub min_retain_age_secs: i64,
}
