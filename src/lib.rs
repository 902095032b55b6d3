//! Per-user encrypted memory engine for conversational assistants.
//!
//! Mnemo durably stores conversational facts and ingested document content,
//! encrypts every payload at rest with a per-owner key, indexes embeddings for
//! semantic search, and serves ranked recall results. Each owner (end user) is
//! an isolated memory space: separately keyed, separately indexed, separately
//! evicted.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for vector search; the vec0 table is partitioned by owner so cross-owner
//!   lookups are structurally impossible
//! - **Encryption**: XChaCha20-Poly1305 envelopes, per-owner keys derived with
//!   Argon2id from a master secret and a per-owner salt
//! - **Embeddings**: remote OpenAI-compatible `/embeddings` endpoint (384
//!   dimensions, L2-normalized), with keyword fallback when unreachable
//! - **Retention**: per-owner LRU eviction with a minimum-age floor, enforced
//!   after every write and by a periodic sweep
//!
//! # Modules
//!
//! - [`config`] — configuration from TOML files and environment variables
//! - [`crypto`] — envelope encryption, key derivation, and the key cache
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`embedding`] — text-to-vector provider contract and the remote client
//! - [`index`] — the vector index seam and its sqlite-vec implementation
//! - [`ingest`] — chunking, fact extraction, summarization, and the pipeline
//! - [`memory`] — persist, retrieve, retention, forget, export, stats
//! - [`engine`] — the owner-scoped facade tying everything together

pub mod config;
pub mod crypto;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod ingest;
pub mod memory;

pub use engine::MemoryEngine;
pub use error::{MemoryError, Result};
