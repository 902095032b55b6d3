//! Write path — owner provisioning, envelope sealing, and atomic persistence.
//!
//! [`persist_item`] is the single entry point for storing a memory item. It
//! seals the payload and writes the metadata row and the vector-index row in
//! one transaction, so the two stores can never hold a partial item. Document
//! rows track ingestion-unit lifecycle separately.

use rusqlite::{params, Connection, OptionalExtension};

use crate::crypto::{self, OwnerCipher};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::memory::now_rfc3339;
use crate::memory::types::{Document, DocumentStatus, ItemPayload, MemoryKind, SourceKind};

/// A fully prepared item ready to be sealed and stored.
pub struct NewItem<'a> {
    pub owner_id: &'a str,
    pub kind: MemoryKind,
    pub payload: &'a ItemPayload,
    pub source_kind: SourceKind,
    pub source_ref: &'a str,
    pub document_id: Option<&'a str>,
    pub embedding: &'a [f32],
}

/// Create the owner row (with a fresh KDF salt) if it does not exist, and
/// return the salt.
pub fn ensure_owner(conn: &Connection, owner_id: &str) -> Result<Vec<u8>> {
    if let Some(salt) = owner_salt(conn, owner_id)? {
        return Ok(salt);
    }
    let salt = crypto::generate_salt();
    conn.execute(
        "INSERT OR IGNORE INTO owners (id, kdf_salt, created_at) VALUES (?1, ?2, ?3)",
        params![owner_id, salt.as_slice(), now_rfc3339()],
    )?;
    // Re-read: a concurrent insert may have won the race
    Ok(owner_salt(conn, owner_id)?.expect("owner row inserted above"))
}

/// Fetch an owner's KDF salt, or `None` if the owner has no memory space.
pub fn owner_salt(conn: &Connection, owner_id: &str) -> Result<Option<Vec<u8>>> {
    let salt = conn
        .query_row(
            "SELECT kdf_salt FROM owners WHERE id = ?1",
            params![owner_id],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(salt)
}

/// All owner ids with a memory space (sweep iteration order).
pub fn all_owner_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM owners ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Seal and store one item: metadata row + vector row in a single transaction.
///
/// Returns the new item's id.
pub fn persist_item(
    conn: &mut Connection,
    index: &dyn VectorIndex,
    cipher: &OwnerCipher,
    item: &NewItem<'_>,
) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_rfc3339();

    let plaintext = serde_json::to_vec(item.payload)?;
    let envelope = cipher.seal(&crypto::record_aad(item.owner_id, &id), &plaintext)?;

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO items (id, owner_id, kind, ciphertext, source_kind, source_ref, document_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            item.owner_id,
            item.kind.as_str(),
            envelope,
            item.source_kind.as_str(),
            item.source_ref,
            item.document_id,
            now,
        ],
    )?;

    index.upsert(&tx, item.owner_id, &id, item.embedding)?;

    if item.kind == MemoryKind::DocumentChunk {
        if let Some(doc_id) = item.document_id {
            tx.execute(
                "UPDATE documents SET chunk_count = chunk_count + 1, updated_at = ?1 WHERE id = ?2",
                params![now, doc_id],
            )?;
        }
    }

    write_audit_log(
        &tx,
        item.owner_id,
        "ingest",
        Some(&id),
        Some(&serde_json::json!({ "kind": item.kind.as_str() })),
    )?;

    tx.commit()?;
    Ok(id)
}

/// Create a document row in `Pending` state. Returns the document id.
pub fn create_document(
    conn: &Connection,
    owner_id: &str,
    name: &str,
    raw_size_bytes: u64,
) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO documents (id, owner_id, name, raw_size_bytes, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
        params![id, owner_id, name, raw_size_bytes, now],
    )?;
    Ok(id)
}

/// Advance a document's lifecycle status. A missing row (e.g. wiped while a
/// pipeline was running) is not an error.
pub fn set_document_status(
    conn: &Connection,
    document_id: &str,
    status: DocumentStatus,
) -> Result<()> {
    conn.execute(
        "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_rfc3339(), document_id],
    )?;
    Ok(())
}

/// Fetch a document scoped to its owner.
pub fn get_document(
    conn: &Connection,
    owner_id: &str,
    document_id: &str,
) -> Result<Option<Document>> {
    let doc = conn
        .query_row(
            "SELECT id, owner_id, name, raw_size_bytes, status, chunk_count, evicted_chunks, \
             created_at, updated_at \
             FROM documents WHERE id = ?1 AND owner_id = ?2",
            params![document_id, owner_id],
            map_document_row,
        )
        .optional()?;
    Ok(doc)
}

/// All documents for an owner, newest first.
pub fn list_documents(conn: &Connection, owner_id: &str) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, raw_size_bytes, status, chunk_count, evicted_chunks, \
         created_at, updated_at \
         FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC",
    )?;
    let docs = stmt
        .query_map(params![owner_id], map_document_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(docs)
}

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let status_str: String = row.get(4)?;
    Ok(Document {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        raw_size_bytes: row.get::<_, i64>(3)? as u64,
        status: status_str.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
        chunk_count: row.get(5)?,
        evicted_chunks: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Remove every item written for a document, from both stores. Used when a
/// cancelled pipeline discards its partial output. Returns items removed.
pub fn delete_document_items(
    conn: &mut Connection,
    index: &dyn VectorIndex,
    owner_id: &str,
    document_id: &str,
) -> Result<usize> {
    let tx = conn.transaction()?;

    let ids: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT id FROM items WHERE owner_id = ?1 AND document_id = ?2")?;
        stmt.query_map(params![owner_id, document_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    for id in &ids {
        index.remove(&tx, owner_id, id)?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
    }

    if !ids.is_empty() {
        write_audit_log(
            &tx,
            owner_id,
            "cancel",
            None,
            Some(&serde_json::json!({ "document_id": document_id, "discarded": ids.len() })),
        )?;
    }

    tx.commit()?;
    Ok(ids.len())
}

/// Write an entry to the memory_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    owner_id: &str,
    operation: &str,
    item_id: Option<&str>,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_log (owner_id, operation, item_id, details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            owner_id,
            operation,
            item_id,
            details.map(|d| d.to_string()),
            now_rfc3339(),
        ],
    )?;
    Ok(())
}
