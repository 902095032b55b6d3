//! Capacity enforcement — per-owner LRU eviction with a minimum-age floor.
//!
//! Runs after every ingestion write and from the periodic sweep. When an owner
//! is over `max_items`, the least-recently-accessed items old enough to evict
//! are removed from both stores in one transaction. Items younger than
//! `min_retain_age` are never evicted; if nothing qualifies, the overflow
//! stands (soft bound — availability wins over strict capacity).

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::index::VectorIndex;
use crate::memory::store::write_audit_log;
use crate::memory::types::RetentionPolicy;

/// Outcome of one enforcement pass.
#[derive(Debug, Serialize)]
pub struct EvictionReport {
    pub owner_id: String,
    /// Items over capacity before the pass.
    pub over_capacity: usize,
    /// Items actually removed (may be less: the min-age floor is absolute).
    pub evicted: usize,
}

/// Number of items stored for an owner.
pub fn count_items(conn: &Connection, owner_id: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Enforce the retention policy for one owner.
///
/// Eviction order: `last_accessed` (falling back to `created_at` for items
/// never recalled) ascending, then `id` ascending for determinism. Removal
/// touches the metadata row, the vector row, and the owning document's
/// eviction counter in a single transaction.
pub fn enforce_owner(
    conn: &mut Connection,
    index: &dyn VectorIndex,
    owner_id: &str,
    policy: &RetentionPolicy,
) -> Result<EvictionReport> {
    let count = count_items(conn, owner_id)?;
    if count <= policy.max_items {
        return Ok(EvictionReport {
            owner_id: owner_id.to_string(),
            over_capacity: 0,
            evicted: 0,
        });
    }

    let excess = count - policy.max_items;
    let cutoff = (Utc::now() - Duration::seconds(policy.min_retain_age_secs)).to_rfc3339();

    let victims: Vec<(String, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT id, document_id FROM items \
             WHERE owner_id = ?1 AND created_at <= ?2 \
             ORDER BY COALESCE(last_accessed, created_at) ASC, id ASC \
             LIMIT ?3",
        )?;
        stmt.query_map(params![owner_id, cutoff, excess as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
    };

    if victims.is_empty() {
        // Everything over capacity is under the min-age floor; accept the
        // overflow rather than evict fresh memories
        debug!(owner = %owner_id, over = excess, "over capacity but nothing evictable");
        return Ok(EvictionReport {
            owner_id: owner_id.to_string(),
            over_capacity: excess,
            evicted: 0,
        });
    }

    let tx = conn.transaction()?;
    for (item_id, document_id) in &victims {
        index.remove(&tx, owner_id, item_id)?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![item_id])?;
        if let Some(doc_id) = document_id {
            tx.execute(
                "UPDATE documents SET evicted_chunks = evicted_chunks + 1, updated_at = ?1 \
                 WHERE id = ?2",
                params![crate::memory::now_rfc3339(), doc_id],
            )?;
        }
        write_audit_log(&tx, owner_id, "evict", Some(item_id), None)?;
    }
    tx.commit()?;

    debug!(owner = %owner_id, evicted = victims.len(), "retention pass complete");
    Ok(EvictionReport {
        owner_id: owner_id.to_string(),
        over_capacity: excess,
        evicted: victims.len(),
    })
}
