use anyhow::{bail, Result};

use crate::cache::fingerprint;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, zero_vector};
use crate::models::{EntityKind, SearchMode};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Find and embed entities that are missing embeddings or whose search
/// text changed since the stored fingerprint was computed.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let mut remaining = limit;
    let mut total = 0usize;
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for kind in EntityKind::ALL {
        if kind.search_mode() != SearchMode::Hybrid {
            continue;
        }
        if remaining == Some(0) {
            break;
        }

        let pending = store
            .pending_searchables(kind, remaining.map(|r| r as i64))
            .await?;
        if let Some(r) = remaining.as_mut() {
            *r = r.saturating_sub(pending.len());
        }
        total += pending.len();

        if dry_run {
            continue;
        }

        for batch in pending.chunks(batch_size) {
            // Blank search texts get the canonical zero vector without an
            // API round-trip.
            let (blank, filled): (Vec<_>, Vec<_>) =
                batch.iter().partition(|rec| rec.search_text.trim().is_empty());

            for rec in &blank {
                let vector = zero_vector(embedder.dims());
                match store
                    .store_embedding(kind, &rec.id, &vector, &fingerprint(&rec.search_text))
                    .await
                {
                    Ok(()) => embedded += 1,
                    Err(e) => {
                        eprintln!("Warning: failed to store embedding for {}: {}", rec.id, e);
                        failed += 1;
                    }
                }
            }

            if filled.is_empty() {
                continue;
            }
            let texts: Vec<String> = filled.iter().map(|rec| rec.search_text.clone()).collect();

            match embedder.embed_many(&texts).await {
                Ok(vectors) => {
                    for (rec, vec) in filled.iter().zip(vectors.iter()) {
                        match store
                            .store_embedding(kind, &rec.id, vec, &fingerprint(&rec.search_text))
                            .await
                        {
                            Ok(()) => embedded += 1,
                            Err(e) => {
                                eprintln!(
                                    "Warning: failed to store embedding for {}: {}",
                                    rec.id, e
                                );
                                failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Warning: embedding batch failed for {}: {}", kind, e);
                    failed += filled.len() as u64;
                }
            }
        }
    }

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  entities needing embeddings: {}", total);
        return Ok(());
    }

    if total == 0 {
        println!("embed pending");
        println!("  all entities up to date");
        return Ok(());
    }

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    Ok(())
}

/// Delete all embeddings and regenerate from scratch.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    {
        let pool = db::connect(config).await?;
        let store = SqliteStore::new(pool);
        for kind in EntityKind::ALL {
            store.clear_embeddings(kind).await?;
        }
    }

    println!("embed rebuild — cleared existing embeddings");
    run_embed_pending(config, None, batch_size_override, false).await
}
