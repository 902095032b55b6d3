//! Scoped deletion and the full owner purge.
//!
//! [`forget_recent`] drops the newest N conversational items (the `/forget n`
//! command). [`wipe_owner`] destroys an owner's entire memory space — items,
//! vectors, documents, audit rows, and the KDF salt — in one transaction, with
//! no tombstones. Without the salt the owner's ciphertexts are unrecoverable
//! even from a disk image, which is the point.

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::index::VectorIndex;
use crate::memory::store::write_audit_log;

/// Result of a full owner purge.
#[derive(Debug, Serialize)]
pub struct WipeReport {
    pub owner_id: String,
    pub items_deleted: usize,
    pub documents_deleted: usize,
}

/// Delete the newest `n` conversation-sourced items (facts and transcript
/// chunks). Document content is untouched. Returns how many were deleted.
pub fn forget_recent(
    conn: &mut Connection,
    index: &dyn VectorIndex,
    owner_id: &str,
    n: usize,
) -> Result<usize> {
    if n == 0 {
        return Ok(0);
    }

    let tx = conn.transaction()?;

    let ids: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM items \
             WHERE owner_id = ?1 AND source_kind = 'conversation' \
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        stmt.query_map(params![owner_id, n as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    for id in &ids {
        index.remove(&tx, owner_id, id)?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        write_audit_log(&tx, owner_id, "forget", Some(id), None)?;
    }

    tx.commit()?;
    info!(owner = %owner_id, forgotten = ids.len(), "forgot recent conversational items");
    Ok(ids.len())
}

/// Destroy everything stored for an owner. Irreversible: the owner row carries
/// the KDF salt, so deleting it revokes the ability to ever derive the key
/// again. Audit rows go too — a wipe leaves no trace of what was stored.
pub fn wipe_owner(
    conn: &mut Connection,
    index: &dyn VectorIndex,
    owner_id: &str,
) -> Result<WipeReport> {
    let tx = conn.transaction()?;

    let items_deleted: i64 = tx.query_row(
        "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    let documents_deleted: i64 = tx.query_row(
        "SELECT COUNT(*) FROM documents WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;

    index.purge_owner(&tx, owner_id)?;
    tx.execute("DELETE FROM memory_log WHERE owner_id = ?1", params![owner_id])?;
    // Cascades to items and documents
    tx.execute("DELETE FROM owners WHERE id = ?1", params![owner_id])?;

    tx.commit()?;

    info!(
        owner = %owner_id,
        items = items_deleted,
        documents = documents_deleted,
        "owner memory space wiped"
    );
    Ok(WipeReport {
        owner_id: owner_id.to_string(),
        items_deleted: items_deleted as usize,
        documents_deleted: documents_deleted as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_owner_cipher, MasterSecret, OwnerCipher};
    use crate::db;
    use crate::index::SqliteVecIndex;
    use crate::memory::store::{create_document, ensure_owner, owner_salt, persist_item, NewItem};
    use crate::memory::types::{ItemPayload, MemoryKind, SourceKind};

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

    fn insert(
        conn: &mut Connection,
        cipher: &OwnerCipher,
        owner: &str,
        i: usize,
        source_kind: SourceKind,
        document_id: Option<&str>,
    ) -> String {
        let payload = ItemPayload::text(format!("memory {i}"));
        persist_item(
            conn,
            &SqliteVecIndex,
            cipher,
            &NewItem {
                owner_id: owner,
                kind: MemoryKind::DocumentChunk,
                payload: &payload,
                source_kind,
                source_ref: "ref:test",
                document_id,
                embedding: &unit(i),
            },
        )
        .unwrap()
    }

    #[test]
    fn forget_recent_deletes_newest_conversational() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");

        let ids: Vec<String> = (0..5)
            .map(|i| insert(&mut conn, &cipher, "u1", i, SourceKind::Conversation, None))
            .collect();

        let deleted = forget_recent(&mut conn, &SqliteVecIndex, "u1", 2).unwrap();
        assert_eq!(deleted, 2);

        // The two newest are gone (UUID v7 ids are time-ordered with created_at)
        for id in &ids[3..] {
            let exists: bool = conn
                .query_row("SELECT COUNT(*) > 0 FROM items WHERE id = ?1", params![id], |r| r.get(0))
                .unwrap();
            assert!(!exists);
        }
        for id in &ids[..3] {
            let exists: bool = conn
                .query_row("SELECT COUNT(*) > 0 FROM items WHERE id = ?1", params![id], |r| r.get(0))
                .unwrap();
            assert!(exists);
        }
        assert_eq!(SqliteVecIndex.count_owner(&conn, "u1").unwrap(), 3);
    }

    #[test]
    fn forget_recent_spares_document_content() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let doc_id = create_document(&conn, "u1", "doc.txt", 10).unwrap();

        insert(&mut conn, &cipher, "u1", 0, SourceKind::Document, Some(&doc_id));
        insert(&mut conn, &cipher, "u1", 1, SourceKind::Conversation, None);

        let deleted = forget_recent(&mut conn, &SqliteVecIndex, "u1", 10).unwrap();
        assert_eq!(deleted, 1);

        let doc_items: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM items WHERE owner_id = 'u1' AND source_kind = 'document'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(doc_items, 1);
    }

    #[test]
    fn forget_zero_is_noop() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        insert(&mut conn, &cipher, "u1", 0, SourceKind::Conversation, None);
        assert_eq!(forget_recent(&mut conn, &SqliteVecIndex, "u1", 0).unwrap(), 0);
    }

    #[test]
    fn wipe_leaves_nothing_behind() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let doc_id = create_document(&conn, "u1", "doc.txt", 10).unwrap();

        insert(&mut conn, &cipher, "u1", 0, SourceKind::Conversation, None);
        insert(&mut conn, &cipher, "u1", 1, SourceKind::Document, Some(&doc_id));

        let report = wipe_owner(&mut conn, &SqliteVecIndex, "u1").unwrap();
        assert_eq!(report.items_deleted, 2);
        assert_eq!(report.documents_deleted, 1);

        // No items, no documents, no vectors, no audit rows, no salt
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM items WHERE owner_id = 'u1'", [], |r| r.get(0))
            .unwrap();
        let docs: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents WHERE owner_id = 'u1'", [], |r| r.get(0))
            .unwrap();
        let log_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_log WHERE owner_id = 'u1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(items, 0);
        assert_eq!(docs, 0);
        assert_eq!(log_rows, 0);
        assert_eq!(SqliteVecIndex.count_owner(&conn, "u1").unwrap(), 0);
        assert!(owner_salt(&conn, "u1").unwrap().is_none());
    }

    #[test]
    fn wipe_does_not_touch_other_owners() {
        let mut conn = test_db();
        let cipher1 = test_cipher(&conn, "u1");
        let cipher2 = test_cipher(&conn, "u2");

        insert(&mut conn, &cipher1, "u1", 0, SourceKind::Conversation, None);
        insert(&mut conn, &cipher2, "u2", 1, SourceKind::Conversation, None);

        wipe_owner(&mut conn, &SqliteVecIndex, "u1").unwrap();

        let u2_items: i64 = conn
            .query_row("SELECT COUNT(*) FROM items WHERE owner_id = 'u2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(u2_items, 1);
        assert!(owner_salt(&conn, "u2").unwrap().is_some());
    }

    #[test]
    fn wipe_unknown_owner_reports_zero() {
        let mut conn = test_db();
        let report = wipe_owner(&mut conn, &SqliteVecIndex, "ghost").unwrap();
        assert_eq!(report.items_deleted, 0);
        assert_eq!(report.documents_deleted, 0);
    }
}
