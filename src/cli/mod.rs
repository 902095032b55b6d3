//! CLI command implementations.
//!
//! Thin wrappers over the engine's user-facing operations; results print as
//! JSON on stdout (logs go to stderr).

use anyhow::{Context, Result};
use serde_json::json;

use crate::engine::MemoryEngine;

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ingest a conversation turn for an owner.
pub async fn ingest(
    engine: &MemoryEngine,
    owner: &str,
    text: &str,
    source_ref: &str,
) -> Result<()> {
    let report = engine.ingest_conversation(owner, text, source_ref).await?;
    print_json(&json!({
        "stored_items": report.item_ids.len(),
        "chunks": report.chunks,
        "facts": report.facts,
    }))
}

/// Ingest a document from a file and wait for the pipeline to finish.
pub async fn ingest_file(engine: &MemoryEngine, owner: &str, path: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {path}"))?;
    let name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    let document_id = engine.ingest_document(owner, &name, text).await?;
    let status = engine.wait_document(owner, &document_id).await?;
    print_json(&json!({
        "document_id": document_id,
        "status": status,
    }))
}

/// Ranked recall for a query.
pub async fn recall(engine: &MemoryEngine, owner: &str, query: &str, k: usize) -> Result<()> {
    let outcome = engine.recall(owner, query, k).await?;
    print_json(&outcome)
}

/// Memory overview: newest items with previews.
pub async fn memory(engine: &MemoryEngine, owner: &str, limit: usize) -> Result<()> {
    let previews = engine.list_memory(owner, limit).await?;
    print_json(&previews)
}

/// Stored-item statistics.
pub async fn stats(engine: &MemoryEngine, owner: &str) -> Result<()> {
    let stats = engine.stats(owner).await?;
    print_json(&stats)
}

/// Full decrypted export to stdout.
pub async fn export(engine: &MemoryEngine, owner: &str) -> Result<()> {
    let snapshot = engine.export(owner).await?;
    print_json(&snapshot)?;
    eprintln!(
        "Exported {} items and {} documents.",
        snapshot.items.len(),
        snapshot.documents.len()
    );
    Ok(())
}

/// Delete the owner's newest n conversational items.
pub async fn forget_recent(engine: &MemoryEngine, owner: &str, n: usize) -> Result<()> {
    let forgotten = engine.forget_recent(owner, n).await?;
    print_json(&json!({ "forgotten": forgotten }))
}

/// Destroy the owner's memory space.
pub async fn wipe(engine: &MemoryEngine, owner: &str) -> Result<()> {
    let report = engine.wipe(owner).await?;
    print_json(&report)
}

/// One retention sweep across all owners.
pub async fn sweep(engine: &MemoryEngine) -> Result<()> {
    let report = engine.sweep().await?;
    print_json(&report)
}
