//! Full decrypted export of an owner's memory space.
//!
//! Read-only: exporting does not count as a retrieval hit, so `last_accessed`
//! is left alone. Items whose envelope fails authentication are listed by id
//! under `unreadable_items` instead of being silently dropped or guessed.

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::error;

use crate::crypto::{self, OwnerCipher};
use crate::error::Result;
use crate::memory::now_rfc3339;
use crate::memory::store::list_documents;
use crate::memory::types::{Document, ItemPayload, MemoryItem};

/// Everything stored for one owner, decrypted for user download.
#[derive(Debug, Serialize)]
pub struct ExportSnapshot {
    pub owner_id: String,
    pub exported_at: String,
    pub items: Vec<MemoryItem>,
    pub documents: Vec<Document>,
    /// Ids of items that failed envelope authentication.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable_items: Vec<String>,
}

/// Build the decrypted snapshot for an owner, oldest item first. An owner with
/// no memory space yields an empty snapshot.
pub fn export_owner(
    conn: &Connection,
    cipher: &OwnerCipher,
    owner_id: &str,
) -> Result<ExportSnapshot> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, ciphertext, source_kind, source_ref, document_id, created_at, last_accessed \
         FROM items WHERE owner_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;

    let rows: Vec<(String, String, Vec<u8>, String, String, Option<String>, String, Option<String>)> =
        stmt.query_map(params![owner_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut items = Vec::with_capacity(rows.len());
    let mut unreadable_items = Vec::new();

    for (id, kind_str, envelope, source_kind_str, source_ref, document_id, created_at, last_accessed) in
        rows
    {
        let (Ok(kind), Ok(source_kind)) = (kind_str.parse(), source_kind_str.parse()) else {
            error!(item = %id, "unparseable kind column, listing as unreadable");
            unreadable_items.push(id);
            continue;
        };
        let plaintext = match cipher.open(&crypto::record_aad(owner_id, &id), &envelope) {
            Ok(p) => p,
            Err(_) => {
                error!(item = %id, "integrity failure during export");
                unreadable_items.push(id);
                continue;
            }
        };
        let payload: ItemPayload = match serde_json::from_slice(&plaintext) {
            Ok(p) => p,
            Err(_) => {
                unreadable_items.push(id);
                continue;
            }
        };
        items.push(MemoryItem {
            id,
            owner_id: owner_id.to_string(),
            kind,
            payload,
            source_kind,
            source_ref,
            document_id,
            created_at,
            last_accessed,
        });
    }

    Ok(ExportSnapshot {
        owner_id: owner_id.to_string(),
        exported_at: now_rfc3339(),
        items,
        documents: list_documents(conn, owner_id)?,
        unreadable_items,
    })
}
