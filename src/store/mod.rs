//! Storage abstraction for the retrieval engine.
//!
//! The [`Store`] trait is the engine's only view of the knowledge graph:
//! slug resolution, the two ranked search branches (lexical and vector),
//! batched by-id loads for denormalization, the edge projection the path
//! finder traverses, and the embedding+fingerprint pair the write path
//! maintains. Entity CRUD itself belongs to the management layer and lives
//! on the concrete implementations, not on the trait.
//!
//! Two implementations:
//! - [`sqlite::SqliteStore`] — production backend (FTS5 + BLOB vectors).
//! - [`memory::MemoryStore`] — brute-force in-memory backend for tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EntityKind, ExampleQuery, Metric,
    SchemaEdge, Synonym, TableNode,
};

/// Resolved scope restriction for a search. Slugs are resolved to ids by
/// the search engine before the store is consulted, so implementations
/// only ever filter on ids.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub datasource_id: Option<String>,
    pub table_id: Option<String>,
    pub column_id: Option<String>,
}

impl Scope {
    pub fn datasource(id: impl Into<String>) -> Self {
        Self {
            datasource_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn is_unscoped(&self) -> bool {
        self.datasource_id.is_none() && self.table_id.is_none() && self.column_id.is_none()
    }
}

/// The embedding-relevant view of one entity: its derived search text and
/// the stored embedding/fingerprint pair.
#[derive(Debug, Clone)]
pub struct SearchableRecord {
    pub id: String,
    pub search_text: String,
    pub fingerprint: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// A schema edge projected onto the tables owning its endpoint columns.
/// This is the adjacency unit the path finder traverses.
#[derive(Debug, Clone)]
pub struct EdgeEnds {
    pub edge: SchemaEdge,
    pub source_table_id: String,
    pub target_table_id: String,
}

/// Abstract storage backend.
///
/// Ranked search methods return entity ids in rank order (best first);
/// the caller derives ranks from positions. Batched loads return entities
/// in unspecified order — callers re-order by id as needed and never issue
/// one lookup per row.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- slug resolution ----

    async fn datasource_id_by_slug(&self, slug: &str) -> Result<Option<String>>;

    /// Resolve a table by slug *or* physical name, optionally scoped to a
    /// datasource. Path-finding anchors accept either form.
    async fn table_by_anchor(
        &self,
        datasource_id: Option<&str>,
        anchor: &str,
    ) -> Result<Option<TableNode>>;

    async fn table_id_by_slug(
        &self,
        datasource_id: Option<&str>,
        slug: &str,
    ) -> Result<Option<String>>;

    async fn column_id_by_slug(&self, table_id: &str, slug: &str) -> Result<Option<String>>;

    // ---- ranked search branches ----

    /// Full-text search within scope; ids in native relevance order.
    async fn lexical_search(
        &self,
        kind: EntityKind,
        query: &str,
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>>;

    /// Nearest-neighbor search within scope; ids ordered closest first.
    /// Entities without a stored embedding never appear.
    async fn vector_search(
        &self,
        kind: EntityKind,
        query_vec: &[f32],
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>>;

    // ---- unranked listing (empty-query pages) ----

    async fn list_ids(
        &self,
        kind: EntityKind,
        scope: &Scope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;

    async fn count_ids(&self, kind: EntityKind, scope: &Scope) -> Result<i64>;

    // ---- batched by-id loads ----

    async fn datasources_by_ids(&self, ids: &[String]) -> Result<Vec<Datasource>>;
    async fn tables_by_ids(&self, ids: &[String]) -> Result<Vec<TableNode>>;
    async fn columns_by_ids(&self, ids: &[String]) -> Result<Vec<ColumnNode>>;
    async fn edges_by_ids(&self, ids: &[String]) -> Result<Vec<SchemaEdge>>;
    async fn metrics_by_ids(&self, ids: &[String]) -> Result<Vec<Metric>>;
    async fn synonyms_by_ids(&self, ids: &[String]) -> Result<Vec<Synonym>>;
    async fn rules_by_ids(&self, ids: &[String]) -> Result<Vec<ContextRule>>;
    async fn values_by_ids(&self, ids: &[String]) -> Result<Vec<CategoricalValue>>;
    async fn examples_by_ids(&self, ids: &[String]) -> Result<Vec<ExampleQuery>>;

    // ---- graph projection ----

    /// All edges lifted to table-level endpoints, optionally restricted to
    /// one datasource (the source column's table decides membership).
    async fn edge_endpoints(&self, datasource_id: Option<&str>) -> Result<Vec<EdgeEnds>>;

    // ---- embedding write path ----

    async fn searchable(&self, kind: EntityKind, id: &str) -> Result<Option<SearchableRecord>>;

    /// Entities whose fingerprint is missing or stale relative to their
    /// current search text.
    async fn pending_searchables(
        &self,
        kind: EntityKind,
        limit: Option<i64>,
    ) -> Result<Vec<SearchableRecord>>;

    async fn store_embedding(
        &self,
        kind: EntityKind,
        id: &str,
        vector: &[f32],
        fingerprint: &str,
    ) -> Result<()>;

    async fn clear_embeddings(&self, kind: EntityKind) -> Result<()>;
}
