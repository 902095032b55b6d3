//! SQL DDL for all mnemo tables.
//!
//! Defines the `owners`, `documents`, `items`, `items_vec` (vec0), `memory_log`,
//! and `schema_meta` tables. Item content is stored only as an encrypted
//! envelope; nothing in this schema holds plaintext. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for mnemo's core tables.
const SCHEMA_SQL: &str = r#"
-- One row per isolated memory space. The KDF salt lives here, apart from the
-- ciphertexts it protects; deleting the row destroys the owner's key material.
CREATE TABLE IF NOT EXISTS owners (
    id TEXT PRIMARY KEY,
    kdf_salt BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- Ingestion units (uploaded files or conversation batches)
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    raw_size_bytes INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('pending','chunking','embedding','stored','failed')),
    chunk_count INTEGER NOT NULL DEFAULT 0,
    evicted_chunks INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);

-- Encrypted memory items. `ciphertext` is a sealed envelope over the item
-- payload; `source_kind`/`source_ref` record provenance.
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK(kind IN ('conversation_fact','document_chunk','summary')),
    ciphertext BLOB NOT NULL,
    source_kind TEXT NOT NULL CHECK(source_kind IN ('conversation','document')),
    source_ref TEXT NOT NULL,
    document_id TEXT REFERENCES documents(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    last_accessed TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id);
CREATE INDEX IF NOT EXISTS idx_items_owner_created ON items(owner_id, created_at);
CREATE INDEX IF NOT EXISTS idx_items_document ON items(document_id);

-- Audit log of mutations (reads are not logged)
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK(operation IN ('ingest','evict','forget','cancel','wipe')),
    item_id TEXT,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_log_owner ON memory_log(owner_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
///
/// `owner_id` is a partition key: every KNN query must name one partition, so
/// a search can never cross owner boundaries.
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS items_vec USING vec0(
    item_id TEXT PRIMARY KEY,
    owner_id TEXT PARTITION KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
