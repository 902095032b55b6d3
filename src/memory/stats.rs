//! Owner statistics and the memory-overview listing.
//!
//! Backs the `stats` and `memory` front-end commands. Listing decrypts only
//! short previews and does not count as a retrieval hit.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::warn;

use crate::crypto::{self, OwnerCipher};
use crate::error::Result;
use crate::memory::truncate_preview;
use crate::memory::types::{ItemPayload, MemoryKind};

/// Counters for one owner's memory space.
#[derive(Debug, Serialize)]
pub struct OwnerStats {
    pub owner_id: String,
    pub total_items: u64,
    pub by_kind: HashMap<String, u64>,
    pub documents: u64,
    /// Bytes of sealed payload at rest.
    pub ciphertext_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_item: Option<String>,
}

/// A single row of the memory overview.
#[derive(Debug, Serialize)]
pub struct MemoryPreview {
    pub id: String,
    pub kind: MemoryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,
    pub preview: String,
    pub created_at: String,
}

/// Compute stored-item statistics for an owner.
pub fn owner_stats(conn: &Connection, owner_id: &str) -> Result<OwnerStats> {
    let mut by_kind = HashMap::new();
    for kind in [
        MemoryKind::ConversationFact,
        MemoryKind::DocumentChunk,
        MemoryKind::Summary,
    ] {
        by_kind.insert(kind.as_str().to_string(), 0u64);
    }

    let mut stmt =
        conn.prepare("SELECT kind, COUNT(*) FROM items WHERE owner_id = ?1 GROUP BY kind")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (kind, count) in rows {
        by_kind.insert(kind, count as u64);
    }

    let total_items: i64 = conn.query_row(
        "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    let documents: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    let ciphertext_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(ciphertext)), 0) FROM items WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    let (oldest_item, newest_item): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM items WHERE owner_id = ?1",
        params![owner_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(OwnerStats {
        owner_id: owner_id.to_string(),
        total_items: total_items as u64,
        by_kind,
        documents: documents as u64,
        ciphertext_bytes: ciphertext_bytes as u64,
        oldest_item,
        newest_item,
    })
}

/// List the owner's newest items with decrypted previews. Unreadable items are
/// skipped with a warning; this is a dashboard, not a recovery tool.
pub fn list_memory(
    conn: &Connection,
    cipher: &OwnerCipher,
    owner_id: &str,
    limit: usize,
) -> Result<Vec<MemoryPreview>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, ciphertext, created_at FROM items \
         WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows: Vec<(String, String, Vec<u8>, String)> = stmt
        .query_map(params![owner_id, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut previews = Vec::with_capacity(rows.len());
    for (id, kind_str, envelope, created_at) in rows {
        let Ok(kind) = kind_str.parse::<MemoryKind>() else {
            warn!(item = %id, "unknown kind, skipping in overview");
            continue;
        };
        let Ok(plaintext) = cipher.open(&crypto::record_aad(owner_id, &id), &envelope) else {
            warn!(item = %id, "unreadable item skipped in overview");
            continue;
        };
        let Ok(payload) = serde_json::from_slice::<ItemPayload>(&plaintext) else {
            warn!(item = %id, "undecodable payload skipped in overview");
            continue;
        };
        previews.push(MemoryPreview {
            id,
            kind,
            fact_key: payload.fact_key,
            preview: truncate_preview(&payload.content, 80),
            created_at,
        });
    }
    Ok(previews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_owner_cipher, MasterSecret};
    use crate::db;
    use crate::index::SqliteVecIndex;
    use crate::memory::store::{create_document, ensure_owner, persist_item, NewItem};
    use crate::memory::types::SourceKind;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn test_cipher(conn: &Connection, owner: &str) -> OwnerCipher {
        let salt = ensure_owner(conn, owner).unwrap();
        derive_owner_cipher(&MasterSecret::new(b"test secret".to_vec()), &salt).unwrap()
    }

    fn unit(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[dim % 384] = 1.0;
        v
    }

    fn insert(conn: &mut Connection, cipher: &OwnerCipher, owner: &str, kind: MemoryKind, i: usize) {
        let payload = match kind {
            MemoryKind::ConversationFact => ItemPayload::fact("preference", format!("likes {i}"), 0.7),
            _ => ItemPayload::text(format!("content number {i}")),
        };
        persist_item(
            conn,
            &SqliteVecIndex,
            cipher,
            &NewItem {
                owner_id: owner,
                kind,
                payload: &payload,
                source_kind: SourceKind::Conversation,
                source_ref: "msg:test",
                document_id: None,
                embedding: &unit(i),
            },
        )
        .unwrap();
    }

    #[test]
    fn empty_owner_stats() {
        let conn = test_db();
        ensure_owner(&conn, "u1").unwrap();
        let stats = owner_stats(&conn, "u1").unwrap();
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.ciphertext_bytes, 0);
        assert_eq!(stats.by_kind["conversation_fact"], 0);
        assert!(stats.oldest_item.is_none());
    }

    #[test]
    fn stats_count_by_kind_and_size() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        insert(&mut conn, &cipher, "u1", MemoryKind::ConversationFact, 0);
        insert(&mut conn, &cipher, "u1", MemoryKind::ConversationFact, 1);
        insert(&mut conn, &cipher, "u1", MemoryKind::DocumentChunk, 2);
        insert(&mut conn, &cipher, "u1", MemoryKind::Summary, 3);
        create_document(&conn, "u1", "doc.txt", 100).unwrap();

        let stats = owner_stats(&conn, "u1").unwrap();
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.by_kind["conversation_fact"], 2);
        assert_eq!(stats.by_kind["document_chunk"], 1);
        assert_eq!(stats.by_kind["summary"], 1);
        assert_eq!(stats.documents, 1);
        assert!(stats.ciphertext_bytes > 0);
        assert!(stats.oldest_item.is_some());
        assert!(stats.newest_item.is_some());
    }

    #[test]
    fn stats_are_owner_scoped() {
        let mut conn = test_db();
        let cipher1 = test_cipher(&conn, "u1");
        let cipher2 = test_cipher(&conn, "u2");
        insert(&mut conn, &cipher1, "u1", MemoryKind::ConversationFact, 0);
        insert(&mut conn, &cipher2, "u2", MemoryKind::DocumentChunk, 1);

        let stats = owner_stats(&conn, "u1").unwrap();
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.by_kind["document_chunk"], 0);
    }

    #[test]
    fn overview_previews_newest_first() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        for i in 0..3 {
            insert(&mut conn, &cipher, "u1", MemoryKind::DocumentChunk, i);
        }

        let previews = list_memory(&conn, &cipher, "u1", 10).unwrap();
        assert_eq!(previews.len(), 3);
        assert_eq!(previews[0].preview, "content number 2");
        assert_eq!(previews[2].preview, "content number 0");
    }

    #[test]
    fn overview_carries_fact_keys() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        insert(&mut conn, &cipher, "u1", MemoryKind::ConversationFact, 0);

        let previews = list_memory(&conn, &cipher, "u1", 10).unwrap();
        assert_eq!(previews[0].fact_key.as_deref(), Some("preference"));
    }

    #[test]
    fn overview_respects_limit() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        for i in 0..5 {
            insert(&mut conn, &cipher, "u1", MemoryKind::DocumentChunk, i);
        }
        assert_eq!(list_memory(&conn, &cipher, "u1", 2).unwrap().len(), 2);
    }
}
