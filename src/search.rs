//! Hybrid search executor.
//!
//! Every query fans into two ranked branches (nearest-neighbor over the
//! stored embeddings, full-text over the lexical index) and the two
//! lists are fused with Reciprocal Rank Fusion:
//!
//! ```text
//! score(id) = Σ 1 / (k + rank_branch(id))        (ranks are 1-based)
//! ```
//!
//! Ids absent from a branch simply contribute nothing from it, so an entity
//! found only lexically still ranks. Ties break on ascending id, which
//! makes the output deterministic for fixed branch inputs.
//!
//! A failed branch degrades the search to single-branch ranking with a
//! warning; only both branches failing surfaces an error. Scope slugs that
//! do not resolve yield an empty page (distinct from the path finder's
//! `NotFound` anchors). Results are denormalized with batched parent
//! lookups: one load per parent kind per page, never one per row.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{AtlasError, Result};
use crate::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EntityKind, ExampleQuery, Metric,
    RelationshipKind, SchemaEdge, SearchMode, Synonym, SynonymTarget, TableNode,
};
use crate::store::{Scope, Store};

// ============ Pagination ============

/// One page of ranked results plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if total > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn empty(page: i64, limit: i64) -> Self {
        Self::new(Vec::new(), 0, page, limit)
    }
}

// ============ Result shapes ============

#[derive(Debug, Clone, Serialize)]
pub struct DatasourceHit {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub engine: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableHit {
    pub id: String,
    pub datasource_id: String,
    pub slug: String,
    pub physical_name: String,
    pub semantic_name: String,
    pub description: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnHit {
    pub id: String,
    pub table_id: String,
    pub table_slug: String,
    pub slug: String,
    pub name: String,
    pub semantic_name: Option<String>,
    pub data_type: String,
    pub is_primary_key: bool,
    pub description: Option<String>,
    pub context_note: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeHit {
    pub id: String,
    pub source_column_id: String,
    pub target_column_id: String,
    /// `table_slug.column_slug` of the source endpoint.
    pub source: String,
    /// `table_slug.column_slug` of the target endpoint.
    pub target: String,
    pub relationship: RelationshipKind,
    pub is_inferred: bool,
    pub description: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricHit {
    pub id: String,
    pub datasource_id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub calculation_sql: String,
    /// Required table ids resolved to slugs (raw id when unresolvable).
    pub required_tables: Vec<String>,
    pub filter_condition: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynonymHit {
    pub id: String,
    pub term: String,
    pub target_kind: String,
    pub target_id: String,
    /// Slug of the mapped entity; `"unknown"` when the target is gone.
    pub maps_to_slug: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleHit {
    pub id: String,
    pub column_id: String,
    pub column_slug: String,
    pub table_slug: String,
    pub slug: String,
    pub rule_text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueHit {
    pub id: String,
    pub column_id: String,
    pub column_slug: String,
    pub table_slug: String,
    pub slug: String,
    pub value_raw: String,
    pub value_label: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExampleQueryHit {
    pub id: String,
    pub datasource_id: String,
    pub slug: String,
    pub prompt: String,
    pub sql: String,
    pub complexity: i32,
    pub verified: bool,
    pub score: f64,
}

// ============ Fusion ============

/// Fuse ranked id lists with Reciprocal Rank Fusion. Ranks are 1-based;
/// ties break on ascending id for determinism.
pub fn rrf_merge(branches: &[Vec<String>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for branch in branches {
        for (idx, id) in branch.iter().enumerate() {
            let rank = idx as f64 + 1.0;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank);
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Drop results scoring below `ratio × top_score`. RRF scores are relative
/// rather than calibrated, so callers prune the tail proportionally.
fn apply_min_ratio(fused: &mut Vec<(String, f64)>, ratio: f64) {
    if let Some(&(_, top)) = fused.first() {
        let floor = ratio * top;
        fused.retain(|(_, s)| *s >= floor);
    }
}

// ============ Engine ============

/// Per-entity-kind hybrid search over a [`Store`].
pub struct SearchEngine<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl<S: Store> SearchEngine<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, retrieval: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            retrieval,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run both branches and fuse, degrading to single-branch ranking when
    /// one side fails. Lexical-only kinds never run the vector branch.
    async fn fused_ranked(
        &self,
        kind: EntityKind,
        query: &str,
        scope: &Scope,
        candidate_k: i64,
    ) -> Result<Vec<(String, f64)>> {
        let k = self.retrieval.rrf_k;

        let lexical = self
            .store
            .lexical_search(kind, query, scope, candidate_k)
            .await;

        let vector = match kind.search_mode() {
            SearchMode::LexicalOnly => Ok(None),
            SearchMode::Hybrid => match self.embedder.embed(query).await {
                Ok(query_vec) => self
                    .store
                    .vector_search(kind, &query_vec, scope, candidate_k)
                    .await
                    .map(Some),
                Err(e) => Err(AtlasError::upstream("embedding generator", e)),
            },
        };

        match (lexical, vector) {
            (Ok(lex), Ok(Some(vec))) => Ok(rrf_merge(&[vec, lex], k)),
            (Ok(lex), Ok(None)) => Ok(rrf_merge(&[lex], k)),
            (Ok(lex), Err(e)) => {
                warn!(kind = %kind, error = %e, "vector branch failed, lexical-only ranking");
                Ok(rrf_merge(&[lex], k))
            }
            (Err(e), Ok(Some(vec))) => {
                warn!(kind = %kind, error = %e, "lexical branch failed, vector-only ranking");
                Ok(rrf_merge(&[vec], k))
            }
            (Err(e), Ok(None)) => Err(e),
            (Err(lex_err), Err(vec_err)) => Err(AtlasError::upstream(
                format!("{} search", kind),
                format!("lexical: {}; vector: {}", lex_err, vec_err),
            )),
        }
    }

    /// Shared ranked-page core: empty-query policy, fusion, ratio pruning,
    /// and slicing. Returns the page's (id, score) pairs and the total.
    async fn ranked_page(
        &self,
        kind: EntityKind,
        query: &str,
        scope: &Scope,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<(Vec<(String, f64)>, i64)> {
        if page < 1 {
            return Err(AtlasError::invalid("page must be >= 1"));
        }
        if limit < 1 {
            return Err(AtlasError::invalid("limit must be >= 1"));
        }
        if let Some(r) = min_ratio {
            if !(0.0..=1.0).contains(&r) {
                return Err(AtlasError::invalid("min_ratio_to_best must be in [0, 1]"));
            }
        }
        let limit = limit.min(self.retrieval.max_limit);
        let offset = (page - 1) * limit;

        if query.trim().is_empty() {
            if !kind.lists_on_empty_query() {
                return Ok((Vec::new(), 0));
            }
            let total = self.store.count_ids(kind, scope).await?;
            let ids = self.store.list_ids(kind, scope, limit, offset).await?;
            return Ok((ids.into_iter().map(|id| (id, 1.0)).collect(), total));
        }

        // Fetch enough candidates per branch to cover the requested page.
        let candidate_k = self.retrieval.candidate_k.max((offset + limit) * 2);

        let mut fused = self.fused_ranked(kind, query, scope, candidate_k).await?;
        if let Some(ratio) = min_ratio {
            apply_min_ratio(&mut fused, ratio);
        }

        let total = fused.len() as i64;
        let slice: Vec<(String, f64)> = fused
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((slice, total))
    }

    /// Resolve optional scope slugs to ids. `None` means a slug did not
    /// resolve and the search should return an empty page.
    async fn resolve_scope(
        &self,
        datasource_slug: Option<&str>,
        table_slug: Option<&str>,
        column_slug: Option<&str>,
    ) -> Result<Option<Scope>> {
        let mut scope = Scope::default();

        if let Some(ds_slug) = datasource_slug {
            match self.store.datasource_id_by_slug(ds_slug).await? {
                Some(id) => scope.datasource_id = Some(id),
                None => return Ok(None),
            }
        }

        if let Some(t_slug) = table_slug {
            match self
                .store
                .table_id_by_slug(scope.datasource_id.as_deref(), t_slug)
                .await?
            {
                Some(id) => scope.table_id = Some(id),
                None => return Ok(None),
            }
        }

        if let Some(c_slug) = column_slug {
            // Column slugs are only unique within a table.
            let Some(table_id) = scope.table_id.as_deref() else {
                return Ok(None);
            };
            match self.store.column_id_by_slug(table_id, c_slug).await? {
                Some(id) => scope.column_id = Some(id),
                None => return Ok(None),
            }
        }

        Ok(Some(scope))
    }

    // ---- Per-kind searches ----

    pub async fn search_datasources(
        &self,
        query: &str,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<DatasourceHit>> {
        let scope = Scope::default();
        let (ranked, total) = self
            .ranked_page(EntityKind::Datasource, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.datasources_by_ids(&ids_of(&ranked)).await?;
        Ok(Page::new(
            datasource_hits(&ranked, entities),
            total,
            page,
            limit,
        ))
    }

    pub async fn search_tables(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<TableHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, None, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::Table, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.tables_by_ids(&ids_of(&ranked)).await?;
        Ok(Page::new(table_hits(&ranked, entities), total, page, limit))
    }

    pub async fn search_columns(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        table_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<ColumnHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, table_slug, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::Column, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.columns_by_ids(&ids_of(&ranked)).await?;
        let hits = column_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_edges(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        table_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<EdgeHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, table_slug, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::Edge, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.edges_by_ids(&ids_of(&ranked)).await?;
        let hits = edge_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_metrics(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<MetricHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, None, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::Metric, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.metrics_by_ids(&ids_of(&ranked)).await?;
        let hits = metric_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_synonyms(
        &self,
        query: &str,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<SynonymHit>> {
        let scope = Scope::default();
        let (ranked, total) = self
            .ranked_page(EntityKind::Synonym, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.synonyms_by_ids(&ids_of(&ranked)).await?;
        let hits = synonym_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_rules(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        table_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<RuleHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, table_slug, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::ContextRule, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.rules_by_ids(&ids_of(&ranked)).await?;
        let hits = rule_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_values(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        table_slug: Option<&str>,
        column_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<ValueHit>> {
        let Some(scope) = self
            .resolve_scope(datasource_slug, table_slug, column_slug)
            .await?
        else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(
                EntityKind::CategoricalValue,
                query,
                &scope,
                page,
                limit,
                min_ratio,
            )
            .await?;
        let entities = self.store.values_by_ids(&ids_of(&ranked)).await?;
        let hits = value_hits(self.store.as_ref(), &ranked, entities).await?;
        Ok(Page::new(hits, total, page, limit))
    }

    pub async fn search_examples(
        &self,
        query: &str,
        datasource_slug: Option<&str>,
        page: i64,
        limit: i64,
        min_ratio: Option<f64>,
    ) -> Result<Page<ExampleQueryHit>> {
        let Some(scope) = self.resolve_scope(datasource_slug, None, None).await? else {
            return Ok(Page::empty(page, limit));
        };
        let (ranked, total) = self
            .ranked_page(EntityKind::ExampleQuery, query, &scope, page, limit, min_ratio)
            .await?;
        let entities = self.store.examples_by_ids(&ids_of(&ranked)).await?;
        Ok(Page::new(example_hits(&ranked, entities), total, page, limit))
    }
}

// ============ Hit hydration (batched parent loads) ============

fn ids_of(ranked: &[(String, f64)]) -> Vec<String> {
    ranked.iter().map(|(id, _)| id.clone()).collect()
}

pub(crate) fn datasource_hits(
    ranked: &[(String, f64)],
    entities: Vec<Datasource>,
) -> Vec<DatasourceHit> {
    let by_id: HashMap<&str, &Datasource> =
        entities.iter().map(|e| (e.id.as_str(), e)).collect();
    ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|ds| DatasourceHit {
                id: ds.id.clone(),
                slug: ds.slug.clone(),
                name: ds.name.clone(),
                description: ds.description.clone(),
                engine: ds.engine.as_str().to_string(),
                score: *score,
            })
        })
        .collect()
}

pub(crate) fn table_hits(ranked: &[(String, f64)], entities: Vec<TableNode>) -> Vec<TableHit> {
    let by_id: HashMap<&str, &TableNode> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|t| TableHit {
                id: t.id.clone(),
                datasource_id: t.datasource_id.clone(),
                slug: t.slug.clone(),
                physical_name: t.physical_name.clone(),
                semantic_name: t.semantic_name.clone(),
                description: t.description.clone(),
                score: *score,
            })
        })
        .collect()
}

pub(crate) async fn column_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<ColumnNode>,
) -> Result<Vec<ColumnHit>> {
    let table_ids: Vec<String> = dedup_ids(entities.iter().map(|c| c.table_id.clone()));
    let tables = store.tables_by_ids(&table_ids).await?;
    let table_slugs: HashMap<&str, &str> = tables
        .iter()
        .map(|t| (t.id.as_str(), t.slug.as_str()))
        .collect();

    let by_id: HashMap<&str, &ColumnNode> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|c| ColumnHit {
                id: c.id.clone(),
                table_id: c.table_id.clone(),
                table_slug: table_slugs
                    .get(c.table_id.as_str())
                    .unwrap_or(&"unknown")
                    .to_string(),
                slug: c.slug.clone(),
                name: c.name.clone(),
                semantic_name: c.semantic_name.clone(),
                data_type: c.data_type.clone(),
                is_primary_key: c.is_primary_key,
                description: c.description.clone(),
                context_note: c.context_note.clone(),
                score: *score,
            })
        })
        .collect())
}

pub(crate) async fn edge_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<SchemaEdge>,
) -> Result<Vec<EdgeHit>> {
    let column_ids: Vec<String> = dedup_ids(
        entities
            .iter()
            .flat_map(|e| [e.source_column_id.clone(), e.target_column_id.clone()]),
    );
    let columns = store.columns_by_ids(&column_ids).await?;
    let table_ids: Vec<String> = dedup_ids(columns.iter().map(|c| c.table_id.clone()));
    let tables = store.tables_by_ids(&table_ids).await?;

    let col_by_id: HashMap<&str, &ColumnNode> =
        columns.iter().map(|c| (c.id.as_str(), c)).collect();
    let table_slugs: HashMap<&str, &str> = tables
        .iter()
        .map(|t| (t.id.as_str(), t.slug.as_str()))
        .collect();

    let label = |column_id: &str| -> String {
        match col_by_id.get(column_id) {
            Some(c) => format!(
                "{}.{}",
                table_slugs.get(c.table_id.as_str()).unwrap_or(&"unknown"),
                c.slug
            ),
            None => "unknown.unknown".to_string(),
        }
    };

    let by_id: HashMap<&str, &SchemaEdge> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|e| EdgeHit {
                id: e.id.clone(),
                source_column_id: e.source_column_id.clone(),
                target_column_id: e.target_column_id.clone(),
                source: label(&e.source_column_id),
                target: label(&e.target_column_id),
                relationship: e.relationship,
                is_inferred: e.is_inferred,
                description: e.description.clone(),
                score: *score,
            })
        })
        .collect())
}

pub(crate) async fn metric_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<Metric>,
) -> Result<Vec<MetricHit>> {
    let table_ids: Vec<String> =
        dedup_ids(entities.iter().flat_map(|m| m.required_tables.clone()));
    let tables = store.tables_by_ids(&table_ids).await?;
    let table_slugs: HashMap<&str, &str> = tables
        .iter()
        .map(|t| (t.id.as_str(), t.slug.as_str()))
        .collect();

    let by_id: HashMap<&str, &Metric> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|m| MetricHit {
                id: m.id.clone(),
                datasource_id: m.datasource_id.clone(),
                slug: m.slug.clone(),
                name: m.name.clone(),
                description: m.description.clone(),
                calculation_sql: m.calculation_sql.clone(),
                required_tables: m
                    .required_tables
                    .iter()
                    .map(|tid| {
                        table_slugs
                            .get(tid.as_str())
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| tid.clone())
                    })
                    .collect(),
                filter_condition: m.filter_condition.clone(),
                score: *score,
            })
        })
        .collect())
}

pub(crate) async fn synonym_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<Synonym>,
) -> Result<Vec<SynonymHit>> {
    // Batch-resolve targets grouped by kind.
    let mut table_ids = Vec::new();
    let mut column_ids = Vec::new();
    let mut metric_ids = Vec::new();
    let mut value_ids = Vec::new();
    for syn in &entities {
        match &syn.target {
            SynonymTarget::Table(id) => table_ids.push(id.clone()),
            SynonymTarget::Column(id) => column_ids.push(id.clone()),
            SynonymTarget::Metric(id) => metric_ids.push(id.clone()),
            SynonymTarget::Value(id) => value_ids.push(id.clone()),
        }
    }

    let mut slugs: HashMap<String, String> = HashMap::new();
    for t in store.tables_by_ids(&table_ids).await? {
        slugs.insert(t.id, t.slug);
    }
    for c in store.columns_by_ids(&column_ids).await? {
        slugs.insert(c.id, c.slug);
    }
    for m in store.metrics_by_ids(&metric_ids).await? {
        slugs.insert(m.id, m.slug);
    }
    for v in store.values_by_ids(&value_ids).await? {
        slugs.insert(v.id, v.slug);
    }

    let by_id: HashMap<&str, &Synonym> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|syn| SynonymHit {
                id: syn.id.clone(),
                term: syn.term.clone(),
                target_kind: syn.target.kind_str().to_string(),
                target_id: syn.target.id().to_string(),
                maps_to_slug: slugs
                    .get(syn.target.id())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                score: *score,
            })
        })
        .collect())
}

pub(crate) async fn rule_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<ContextRule>,
) -> Result<Vec<RuleHit>> {
    let (col_slugs, table_slugs) =
        column_parents(store, entities.iter().map(|r| r.column_id.clone())).await?;

    let by_id: HashMap<&str, &ContextRule> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|r| RuleHit {
                id: r.id.clone(),
                column_id: r.column_id.clone(),
                column_slug: lookup(&col_slugs, &r.column_id),
                table_slug: lookup(&table_slugs, &r.column_id),
                slug: r.slug.clone(),
                rule_text: r.rule_text.clone(),
                score: *score,
            })
        })
        .collect())
}

pub(crate) async fn value_hits<S: Store>(
    store: &S,
    ranked: &[(String, f64)],
    entities: Vec<CategoricalValue>,
) -> Result<Vec<ValueHit>> {
    let (col_slugs, table_slugs) =
        column_parents(store, entities.iter().map(|v| v.column_id.clone())).await?;

    let by_id: HashMap<&str, &CategoricalValue> =
        entities.iter().map(|e| (e.id.as_str(), e)).collect();
    Ok(ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|v| ValueHit {
                id: v.id.clone(),
                column_id: v.column_id.clone(),
                column_slug: lookup(&col_slugs, &v.column_id),
                table_slug: lookup(&table_slugs, &v.column_id),
                slug: v.slug.clone(),
                value_raw: v.value_raw.clone(),
                value_label: v.value_label.clone(),
                score: *score,
            })
        })
        .collect())
}

pub(crate) fn example_hits(
    ranked: &[(String, f64)],
    entities: Vec<ExampleQuery>,
) -> Vec<ExampleQueryHit> {
    let by_id: HashMap<&str, &ExampleQuery> =
        entities.iter().map(|e| (e.id.as_str(), e)).collect();
    ranked
        .iter()
        .filter_map(|(id, score)| {
            by_id.get(id.as_str()).map(|ex| ExampleQueryHit {
                id: ex.id.clone(),
                datasource_id: ex.datasource_id.clone(),
                slug: ex.slug.clone(),
                prompt: ex.prompt_text.clone(),
                sql: ex.sql_query.clone(),
                complexity: ex.complexity_score,
                verified: ex.verified,
                score: *score,
            })
        })
        .collect()
}

/// Resolve `column_id -> (column_slug, table_slug)` maps for a batch of
/// column ids, with two batched loads.
async fn column_parents<S: Store>(
    store: &S,
    column_ids: impl Iterator<Item = String>,
) -> Result<(HashMap<String, String>, HashMap<String, String>)> {
    let ids = dedup_ids(column_ids);
    let columns = store.columns_by_ids(&ids).await?;
    let table_ids: Vec<String> = dedup_ids(columns.iter().map(|c| c.table_id.clone()));
    let tables = store.tables_by_ids(&table_ids).await?;
    let table_slug_by_id: HashMap<&str, &str> = tables
        .iter()
        .map(|t| (t.id.as_str(), t.slug.as_str()))
        .collect();

    let mut col_slugs = HashMap::new();
    let mut table_slugs = HashMap::new();
    for c in &columns {
        col_slugs.insert(c.id.clone(), c.slug.clone());
        table_slugs.insert(
            c.id.clone(),
            table_slug_by_id
                .get(c.table_id.as_str())
                .unwrap_or(&"unknown")
                .to_string(),
        );
    }
    Ok((col_slugs, table_slugs))
}

fn lookup(map: &HashMap<String, String>, key: &str) -> String {
    map.get(key).cloned().unwrap_or_else(|| "unknown".to_string())
}

fn dedup_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rrf_fusion_correctness() {
        // Vector ranks {A:1, B:2, C:3}; lexical ranks {B:1, C:2, D:3}; k=60.
        let fused = rrf_merge(&[ids(&["A", "B", "C"]), ids(&["B", "C", "D"])], 60.0);
        let score: HashMap<&str, f64> = fused.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let b = score["B"];
        let c = score["C"];
        let a = score["A"];
        let d = score["D"];

        assert!((b - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((c - (1.0 / 63.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((a - 1.0 / 61.0).abs() < 1e-12);
        assert!((d - 1.0 / 63.0).abs() < 1e-12);

        // Dual-branch entries beat single-branch ones; single-branch entries
        // are still present with nonzero score.
        assert!(b > c && c > a && a > d);
        assert!(d > 0.0);
        assert_eq!(fused[0].0, "B");
    }

    #[test]
    fn test_rrf_deterministic() {
        let a = rrf_merge(&[ids(&["x", "y"]), ids(&["y", "z"])], 60.0);
        let b = rrf_merge(&[ids(&["x", "y"]), ids(&["y", "z"])], 60.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rrf_never_double_counts() {
        // An id appearing in both branches contributes once per branch,
        // never twice within one branch.
        let fused = rrf_merge(&[ids(&["a"]), ids(&["a"])], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_tie_break_by_id() {
        // Same rank in disjoint branches → equal scores, id order decides.
        let fused = rrf_merge(&[ids(&["zeta"]), ids(&["alpha"])], 60.0);
        assert_eq!(fused[0].0, "alpha");
        assert_eq!(fused[1].0, "zeta");
    }

    #[test]
    fn test_min_ratio_prunes_tail() {
        let mut fused = vec![
            ("a".to_string(), 0.10),
            ("b".to_string(), 0.06),
            ("c".to_string(), 0.01),
        ];
        apply_min_ratio(&mut fused, 0.5);
        let kept: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(kept, vec!["a", "b"]);
    }

    #[test]
    fn test_min_ratio_on_empty_is_noop() {
        let mut fused: Vec<(String, f64)> = Vec::new();
        apply_min_ratio(&mut fused, 0.5);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_page_meta_math() {
        let p: Page<i32> = Page::new(vec![1, 2, 3], 23, 2, 10);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);

        let empty: Page<i32> = Page::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
