//! Content-hash-gated embedding cache.
//!
//! Every searchable entity carries a `(embedding, fingerprint)` pair where
//! the fingerprint is the SHA-256 of the derived search text at the time
//! the embedding was computed. [`EmbeddingCache::ensure`] regenerates the
//! vector only when that fingerprint is stale; the common case of an
//! unrelated-field update costs one hash, not one API call.
//!
//! Failure semantics: a provider error leaves the stored pair untouched, so
//! the next attempt retries; an entity that never had an embedding simply
//! stays out of the vector branch while remaining lexically searchable.
//! Search must not break for entities behind a rate-limited embedder.
//!
//! Concurrent `ensure` calls for the *same* entity serialize on a per-entity
//! async lock, closing the lost-update race where two writers both embed
//! against a stale fingerprint. Distinct entities proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::embedding::{zero_vector, Embedder};
use crate::error::{AtlasError, Result};
use crate::models::{EntityKind, SearchMode};
use crate::store::Store;

/// SHA-256 content fingerprint, 64 lowercase hex chars.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of [`EmbeddingCache::ensure`].
#[derive(Debug, Clone)]
pub struct Ensured {
    pub vector: Vec<f32>,
    /// True when the embedder was invoked and the stored pair rewritten.
    pub updated: bool,
}

/// Write-path capability: injected where entities are created/updated,
/// created once per process, safe to share across concurrent tasks.
pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    locks: Mutex<HashMap<(EntityKind, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl EmbeddingCache {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn entity_lock(&self, kind: EntityKind, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((kind, id.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Ensure the entity's stored embedding matches its current search text.
    ///
    /// Returns the (possibly pre-existing) vector and whether it was
    /// recomputed. `NotFound` if the entity does not exist;
    /// `InvalidArgument` for lexical-only kinds.
    pub async fn ensure<S: Store>(
        &self,
        store: &S,
        kind: EntityKind,
        id: &str,
    ) -> Result<Ensured> {
        if kind.search_mode() == SearchMode::LexicalOnly {
            return Err(AtlasError::invalid(format!(
                "{} entities are lexical-only and carry no embedding",
                kind
            )));
        }

        let lock = self.entity_lock(kind, id);
        let _guard = lock.lock().await;

        let record = store
            .searchable(kind, id)
            .await?
            .ok_or_else(|| AtlasError::not_found(format!("{} {}", kind, id)))?;

        let fp = fingerprint(&record.search_text);

        if record.fingerprint.as_deref() == Some(fp.as_str()) {
            if let Some(vector) = record.embedding {
                debug!(kind = %kind, id, "embedding fingerprint fresh, skipping");
                return Ok(Ensured {
                    vector,
                    updated: false,
                });
            }
        }

        // Blank search text never reaches the external service.
        if record.search_text.trim().is_empty() {
            let vector = zero_vector(self.embedder.dims());
            store.store_embedding(kind, id, &vector, &fp).await?;
            return Ok(Ensured {
                vector,
                updated: true,
            });
        }

        let vector = self
            .embedder
            .embed(&record.search_text)
            .await
            .map_err(|e| AtlasError::upstream("embedding generator", e))?;

        store.store_embedding(kind, id, &vector, &fp).await?;
        debug!(kind = %kind, id, "embedding recomputed");

        Ok(Ensured {
            vector,
            updated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint("orders");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls
        assert_eq!(fp, fingerprint("orders"));
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        assert_ne!(fingerprint("orders"), fingerprint("customers"));
    }
}
