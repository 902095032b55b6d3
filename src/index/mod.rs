//! The vector index seam.
//!
//! [`VectorIndex`] hides the similarity-search structure behind a small
//! interface so ingestion and retrieval never touch vec0 SQL directly, and the
//! structure stays swappable. Methods borrow the caller's connection, which
//! lets index writes join the same transaction as metadata writes — the two
//! stores move together or not at all.
//!
//! Every operation is owner-scoped. The sqlite-vec implementation makes that
//! structural: `owner_id` is a vec0 partition key, so a KNN probe physically
//! cannot return another owner's vectors.

use rusqlite::{params, Connection};

use crate::error::Result;

/// A single nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub item_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f64,
}

/// Owner-scoped vector index operations.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the embedding for an item.
    fn upsert(
        &self,
        conn: &Connection,
        owner_id: &str,
        item_id: &str,
        embedding: &[f32],
    ) -> Result<()>;

    /// Remove an item's embedding. Missing entries are not an error.
    fn remove(&self, conn: &Connection, owner_id: &str, item_id: &str) -> Result<()>;

    /// K-nearest-neighbor search within one owner's partition, best first.
    fn search(
        &self,
        conn: &Connection,
        owner_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>>;

    /// Remove every embedding belonging to an owner. Returns rows removed.
    fn purge_owner(&self, conn: &Connection, owner_id: &str) -> Result<usize>;

    /// Number of embeddings stored for an owner (consistency checks).
    fn count_owner(&self, conn: &Connection, owner_id: &str) -> Result<u64>;
}

/// sqlite-vec (vec0) backed index over the `items_vec` virtual table.
pub struct SqliteVecIndex;

impl VectorIndex for SqliteVecIndex {
    fn upsert(
        &self,
        conn: &Connection,
        owner_id: &str,
        item_id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        // vec0 has no ON CONFLICT; replace is delete + insert
        conn.execute(
            "DELETE FROM items_vec WHERE item_id = ?1 AND owner_id = ?2",
            params![item_id, owner_id],
        )?;
        conn.execute(
            "INSERT INTO items_vec (item_id, owner_id, embedding) VALUES (?1, ?2, ?3)",
            params![item_id, owner_id, embedding_to_bytes(embedding)],
        )?;
        Ok(())
    }

    fn remove(&self, conn: &Connection, owner_id: &str, item_id: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM items_vec WHERE item_id = ?1 AND owner_id = ?2",
            params![item_id, owner_id],
        )?;
        Ok(())
    }

    fn search(
        &self,
        conn: &Connection,
        owner_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT item_id, distance FROM items_vec \
             WHERE embedding MATCH ?1 AND owner_id = ?2 AND k = ?3 \
             ORDER BY distance",
        )?;
        let hits = stmt
            .query_map(
                params![embedding_to_bytes(query), owner_id, k as i64],
                |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits
            .into_iter()
            .map(|(item_id, distance)| IndexHit {
                item_id,
                similarity: l2_distance_to_cosine(distance),
            })
            .collect())
    }

    fn purge_owner(&self, conn: &Connection, owner_id: &str) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM items_vec WHERE owner_id = ?1",
            params![owner_id],
        )?;
        Ok(removed)
    }

    fn count_owner(&self, conn: &Connection, owner_id: &str) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items_vec WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// For L2-normalized vectors: `cos = 1 - d² / 2` where `d` is L2 distance.
pub fn l2_distance_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}
