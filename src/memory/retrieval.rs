//! Read path — semantic recall with ranked re-scoring, and the keyword
//! fallback used when the embedding provider is unreachable.
//!
//! Semantic recall: KNN probe in the owner's index partition → fetch + decrypt
//! metadata rows → blend cosine similarity with a recency decay → bump
//! `last_accessed` on the returned items. Items that fail decryption or exist
//! in only one store are excluded from results and logged, never guessed.
//!
//! Ranking is deterministic: the decay factor is computed from the immutable
//! `created_at`, and ties break on `last_accessed` (newer first) then `id`, so
//! an identical query against an unchanged index returns an identical order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{error, warn};

use crate::crypto::{self, OwnerCipher};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::memory::now_rfc3339;
use crate::memory::types::{ItemPayload, MemoryKind};

// ── Public types ──────────────────────────────────────────────────────────────

/// A single recall result, decrypted.
#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    pub id: String,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,
    /// Blended ranking score (similarity × recency mix).
    pub score: f64,
    /// Raw cosine similarity; zero for keyword-fallback hits.
    pub similarity: f64,
    pub created_at: String,
}

/// Ranking knobs (spec leaves the exact weighting open — these are config).
#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    pub similarity_weight: f64,
    pub recency_weight: f64,
    pub recency_half_life_secs: f64,
}

// ── Internal row struct for fetched items ─────────────────────────────────────

struct DecryptedRow {
    id: String,
    kind: MemoryKind,
    payload: ItemPayload,
    created_at: String,
    last_accessed: Option<String>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Semantic recall: index probe → decrypt → blend → rank → track access.
pub fn retrieve_semantic(
    conn: &Connection,
    index: &dyn VectorIndex,
    cipher: &OwnerCipher,
    owner_id: &str,
    query_embedding: &[f32],
    k: usize,
    ranking: &RankingParams,
) -> Result<Vec<RecallHit>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    // Widen the probe so the recency blend has headroom to reorder
    let candidate_k = (k * 4).clamp(k, 64);
    let hits = index.search(conn, owner_id, query_embedding, candidate_k)?;

    let ids: Vec<&str> = hits.iter().map(|h| h.item_id.as_str()).collect();
    let rows = fetch_decrypted(conn, cipher, owner_id, &ids)?;

    let now = Utc::now();
    let mut scored: Vec<(DecryptedRow, f64, f64)> = Vec::new();
    for hit in &hits {
        let Some(row) = rows.get(hit.item_id.as_str()) else {
            // Present in the vector index, absent (or unreadable) in the
            // metadata store — skip; fetch_decrypted already logged why.
            continue;
        };
        let recency = recency_factor(&row.created_at, now, ranking.recency_half_life_secs);
        let score =
            ranking.similarity_weight * hit.similarity + ranking.recency_weight * recency;
        scored.push((clone_row(row), score, hit.similarity));
    }

    scored.sort_by(|a, b| compare_ranked(&(b.1, &b.0), &(a.1, &a.0)));
    scored.truncate(k);

    let returned_ids: Vec<&str> = scored.iter().map(|(row, _, _)| row.id.as_str()).collect();
    update_access(conn, owner_id, &returned_ids)?;

    Ok(scored
        .into_iter()
        .map(|(row, score, similarity)| RecallHit {
            id: row.id,
            kind: row.kind,
            content: row.payload.content,
            fact_key: row.payload.fact_key,
            score,
            similarity,
            created_at: row.created_at,
        })
        .collect())
}

/// Keyword fallback: bounded scan over the owner's newest items, decrypted and
/// ranked by matched query terms. Explicit degradation for when the embedding
/// provider is down — never a silent empty result.
pub fn retrieve_keyword(
    conn: &Connection,
    cipher: &OwnerCipher,
    owner_id: &str,
    query_text: &str,
    k: usize,
    scan_limit: usize,
) -> Result<Vec<RecallHit>> {
    let terms: Vec<String> = query_text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM items WHERE owner_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        stmt.query_map(params![owner_id, scan_limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
    let rows = fetch_decrypted(conn, cipher, owner_id, &id_refs)?;

    let mut scored: Vec<(DecryptedRow, f64)> = Vec::new();
    for row in rows.into_values() {
        let haystack = row.payload.content.to_lowercase();
        let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
        if matched == 0 {
            continue;
        }
        let score = matched as f64 / terms.len() as f64;
        scored.push((row, score));
    }

    scored.sort_by(|a, b| compare_ranked(&(b.1, &b.0), &(a.1, &a.0)));
    scored.truncate(k);

    let returned_ids: Vec<&str> = scored.iter().map(|(row, _)| row.id.as_str()).collect();
    update_access(conn, owner_id, &returned_ids)?;

    Ok(scored
        .into_iter()
        .map(|(row, score)| RecallHit {
            id: row.id,
            kind: row.kind,
            content: row.payload.content,
            fact_key: row.payload.fact_key,
            score,
            similarity: 0.0,
            created_at: row.created_at,
        })
        .collect())
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Batch-fetch and decrypt item rows. Rows that fail authentication or that
/// the metadata store does not know are dropped from the map after logging.
fn fetch_decrypted(
    conn: &Connection,
    cipher: &OwnerCipher,
    owner_id: &str,
    ids: &[&str],
) -> Result<HashMap<String, DecryptedRow>> {
    let mut map = HashMap::new();
    if ids.is_empty() {
        return Ok(map);
    }

    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, kind, ciphertext, created_at, last_accessed \
         FROM items WHERE owner_id = ?1 AND id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut sql_params: Vec<&dyn rusqlite::types::ToSql> = vec![&owner_id];
    for id in ids {
        sql_params.push(id);
    }

    let rows: Vec<(String, String, Vec<u8>, String, Option<String>)> = stmt
        .query_map(sql_params.as_slice(), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut found = std::collections::HashSet::new();
    for (id, kind_str, envelope, created_at, last_accessed) in rows {
        found.insert(id.clone());
        let Ok(kind) = kind_str.parse::<MemoryKind>() else {
            error!(item = %id, kind = %kind_str, "unknown kind in metadata store");
            continue;
        };
        let plaintext = match cipher.open(&crypto::record_aad(owner_id, &id), &envelope) {
            Ok(p) => p,
            Err(_) => {
                // Tamper or corruption: the item is unreadable, never guessed
                error!(item = %id, "integrity failure, excluding item from results");
                continue;
            }
        };
        let payload: ItemPayload = match serde_json::from_slice(&plaintext) {
            Ok(p) => p,
            Err(e) => {
                error!(item = %id, error = %e, "payload decode failure, excluding item");
                continue;
            }
        };
        map.insert(
            id.clone(),
            DecryptedRow { id, kind, payload, created_at, last_accessed },
        );
    }

    for id in ids {
        if !found.contains(*id) {
            let err = crate::error::MemoryError::StoreInconsistency {
                item_id: id.to_string(),
                detail: "vector index entry has no metadata row".into(),
            };
            warn!(error = %err, "excluding divergent item until repaired");
        }
    }

    Ok(map)
}

/// Exponential half-life decay on item age. `1.0` for brand-new items.
fn recency_factor(created_at: &str, now: DateTime<Utc>, half_life_secs: f64) -> f64 {
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return 0.0;
    };
    let age_secs = (now - created.with_timezone(&Utc)).num_seconds().max(0) as f64;
    if half_life_secs <= 0.0 {
        return 0.0;
    }
    0.5_f64.powf(age_secs / half_life_secs)
}

/// Order by score, then more-recent `last_accessed`, then `id` — fully
/// deterministic.
fn compare_ranked(a: &(f64, &DecryptedRow), b: &(f64, &DecryptedRow)) -> std::cmp::Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.1.last_accessed.cmp(&b.1.last_accessed))
        .then_with(|| b.1.id.cmp(&a.1.id))
}

fn clone_row(row: &DecryptedRow) -> DecryptedRow {
    DecryptedRow {
        id: row.id.clone(),
        kind: row.kind,
        payload: row.payload.clone(),
        created_at: row.created_at.clone(),
        last_accessed: row.last_accessed.clone(),
    }
}

/// Batch update `last_accessed` for returned results (a retrieval hit).
fn update_access(conn: &Connection, owner_id: &str, ids: &[&str]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = now_rfc3339();
    let mut stmt = conn
        .prepare("UPDATE items SET last_accessed = ?1 WHERE owner_id = ?2 AND id = ?3")?;
    for id in ids {
        stmt.execute(params![now, owner_id, id])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_owner_cipher, MasterSecret};
    use crate::db;
    use crate::index::SqliteVecIndex;
    use crate::memory::store::{ensure_owner, persist_item, NewItem};
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

    fn ranking() -> RankingParams {
        RankingParams {
            similarity_weight: 0.75,
            recency_weight: 0.25,
            recency_half_life_secs: 7.0 * 24.0 * 3600.0,
        }
    }

    fn insert(
        conn: &mut Connection,
        cipher: &OwnerCipher,
        owner: &str,
        content: &str,
        kind: MemoryKind,
        emb: &[f32],
    ) -> String {
        let payload = ItemPayload::text(content);
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
                embedding: emb,
            },
        )
        .unwrap()
    }

    #[test]
    fn semantic_recall_returns_nearest_decrypted() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let id_near = insert(
            &mut conn, &cipher, "u1",
            "I am allergic to peanuts", MemoryKind::ConversationFact, &unit(0),
        );
        insert(
            &mut conn, &cipher, "u1",
            "Deploy notes from Friday", MemoryKind::DocumentChunk, &unit(100),
        );

        let hits = retrieve_semantic(
            &conn, &SqliteVecIndex, &cipher, "u1", &unit(0), 3, &ranking(),
        )
        .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, id_near);
        assert_eq!(hits[0].content, "I am allergic to peanuts");
        assert!(hits[0].similarity > 0.99);
    }

    #[test]
    fn recall_bumps_last_accessed() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let id = insert(&mut conn, &cipher, "u1", "trackable", MemoryKind::ConversationFact, &unit(0));

        let before: Option<String> = conn
            .query_row("SELECT last_accessed FROM items WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert!(before.is_none());

        retrieve_semantic(&conn, &SqliteVecIndex, &cipher, "u1", &unit(0), 1, &ranking()).unwrap();

        let after: Option<String> = conn
            .query_row("SELECT last_accessed FROM items WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert!(after.is_some());
    }

    #[test]
    fn repeated_query_is_deterministic() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        for i in 0..6 {
            insert(
                &mut conn, &cipher, "u1",
                &format!("note number {i}"), MemoryKind::DocumentChunk, &unit(i),
            );
        }

        let first: Vec<String> = retrieve_semantic(
            &conn, &SqliteVecIndex, &cipher, "u1", &unit(2), 5, &ranking(),
        )
        .unwrap()
        .into_iter()
        .map(|h| h.id)
        .collect();

        let second: Vec<String> = retrieve_semantic(
            &conn, &SqliteVecIndex, &cipher, "u1", &unit(2), 5, &ranking(),
        )
        .unwrap()
        .into_iter()
        .map(|h| h.id)
        .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn corrupted_item_is_excluded_not_guessed() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let id_good = insert(&mut conn, &cipher, "u1", "good item", MemoryKind::ConversationFact, &unit(0));
        let id_bad = insert(&mut conn, &cipher, "u1", "bad item", MemoryKind::ConversationFact, &unit(1));

        // Flip bytes in the stored envelope
        conn.execute(
            "UPDATE items SET ciphertext = x'0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e' WHERE id = ?1",
            params![id_bad],
        )
        .unwrap();

        let hits = retrieve_semantic(
            &conn, &SqliteVecIndex, &cipher, "u1", &unit(1), 5, &ranking(),
        )
        .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(!ids.contains(&id_bad.as_str()));
        assert!(ids.contains(&id_good.as_str()));
    }

    #[test]
    fn keyword_fallback_matches_terms() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        let id_match = insert(
            &mut conn, &cipher, "u1",
            "I am allergic to peanuts", MemoryKind::ConversationFact, &unit(0),
        );
        insert(
            &mut conn, &cipher, "u1",
            "Deploy pipeline instructions", MemoryKind::DocumentChunk, &unit(1),
        );

        let hits = retrieve_keyword(&conn, &cipher, "u1", "peanuts allergic", 5, 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id_match);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[0].similarity, 0.0);
    }

    #[test]
    fn keyword_fallback_empty_query_returns_nothing() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        insert(&mut conn, &cipher, "u1", "anything", MemoryKind::DocumentChunk, &unit(0));

        assert!(retrieve_keyword(&conn, &cipher, "u1", "   ", 5, 100).unwrap().is_empty());
    }

    #[test]
    fn recency_factor_decays_with_age() {
        let now = Utc::now();
        let fresh = now.to_rfc3339();
        let old = (now - chrono::Duration::days(14)).to_rfc3339();
        let half_life = 7.0 * 24.0 * 3600.0;

        let fresh_factor = recency_factor(&fresh, now, half_life);
        let old_factor = recency_factor(&old, now, half_life);
        assert!(fresh_factor > 0.99);
        // Two half-lives → ~0.25
        assert!((old_factor - 0.25).abs() < 0.01);
    }

    #[test]
    fn k_zero_returns_empty() {
        let mut conn = test_db();
        let cipher = test_cipher(&conn, "u1");
        insert(&mut conn, &cipher, "u1", "something", MemoryKind::DocumentChunk, &unit(0));

        let hits = retrieve_semantic(
            &conn, &SqliteVecIndex, &cipher, "u1", &unit(0), 0, &ranking(),
        )
        .unwrap();
        assert!(hits.is_empty());
    }
}
