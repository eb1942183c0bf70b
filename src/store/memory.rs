//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind a `std::sync::RwLock`. Lexical search ranks by
//! token-overlap count over the derived search text; vector search is
//! brute-force cosine similarity. Both honor the same scope semantics as
//! the SQLite backend so engine tests exercise identical filtering.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{AtlasError, Result};
use crate::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EntityKind, ExampleQuery, Metric,
    SchemaEdge, Synonym, TableNode,
};

use super::{EdgeEnds, Scope, SearchableRecord, Store};

#[derive(Default)]
struct Inner {
    datasources: HashMap<String, Datasource>,
    tables: HashMap<String, TableNode>,
    columns: HashMap<String, ColumnNode>,
    edges: HashMap<String, SchemaEdge>,
    metrics: HashMap<String, Metric>,
    synonyms: HashMap<String, Synonym>,
    rules: HashMap<String, ContextRule>,
    values: HashMap<String, CategoricalValue>,
    examples: HashMap<String, ExampleQuery>,
    /// (vector, fingerprint) per embedded entity.
    embeddings: HashMap<(EntityKind, String), (Vec<f32>, String)>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_datasource(&self, ds: Datasource) {
        self.inner.write().unwrap().datasources.insert(ds.id.clone(), ds);
    }

    pub fn insert_table(&self, table: TableNode) {
        self.inner.write().unwrap().tables.insert(table.id.clone(), table);
    }

    pub fn insert_column(&self, col: ColumnNode) {
        self.inner.write().unwrap().columns.insert(col.id.clone(), col);
    }

    pub fn insert_edge(&self, edge: SchemaEdge) {
        self.inner.write().unwrap().edges.insert(edge.id.clone(), edge);
    }

    pub fn insert_metric(&self, metric: Metric) {
        self.inner.write().unwrap().metrics.insert(metric.id.clone(), metric);
    }

    pub fn insert_synonym(&self, syn: Synonym) {
        self.inner.write().unwrap().synonyms.insert(syn.id.clone(), syn);
    }

    pub fn insert_rule(&self, rule: ContextRule) {
        self.inner.write().unwrap().rules.insert(rule.id.clone(), rule);
    }

    pub fn insert_value(&self, value: CategoricalValue) {
        self.inner.write().unwrap().values.insert(value.id.clone(), value);
    }

    pub fn insert_example(&self, ex: ExampleQuery) {
        self.inner.write().unwrap().examples.insert(ex.id.clone(), ex);
    }

    /// Seed an embedding directly, bypassing the cache.
    pub fn set_embedding(&self, kind: EntityKind, id: &str, vector: Vec<f32>, fp: &str) {
        self.inner
            .write()
            .unwrap()
            .embeddings
            .insert((kind, id.to_string()), (vector, fp.to_string()));
    }

    /// How many embeddings are stored for a kind (test assertions).
    pub fn embedding_count(&self, kind: EntityKind) -> usize {
        self.inner
            .read()
            .unwrap()
            .embeddings
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

impl Inner {
    fn search_text_of(&self, kind: EntityKind, id: &str) -> Option<String> {
        match kind {
            EntityKind::Datasource => self.datasources.get(id).map(|e| e.search_text()),
            EntityKind::Table => self.tables.get(id).map(|e| e.search_text()),
            EntityKind::Column => self.columns.get(id).map(|e| e.search_text()),
            EntityKind::Edge => self.edges.get(id).map(|e| e.search_text()),
            EntityKind::Metric => self.metrics.get(id).map(|e| e.search_text()),
            EntityKind::Synonym => self.synonyms.get(id).map(|e| e.search_text()),
            EntityKind::ContextRule => self.rules.get(id).map(|e| e.search_text()),
            EntityKind::CategoricalValue => self.values.get(id).map(|e| e.search_text()),
            EntityKind::ExampleQuery => self.examples.get(id).map(|e| e.search_text()),
        }
    }

    fn ids_of(&self, kind: EntityKind) -> Vec<String> {
        match kind {
            EntityKind::Datasource => self.datasources.keys().cloned().collect(),
            EntityKind::Table => self.tables.keys().cloned().collect(),
            EntityKind::Column => self.columns.keys().cloned().collect(),
            EntityKind::Edge => self.edges.keys().cloned().collect(),
            EntityKind::Metric => self.metrics.keys().cloned().collect(),
            EntityKind::Synonym => self.synonyms.keys().cloned().collect(),
            EntityKind::ContextRule => self.rules.keys().cloned().collect(),
            EntityKind::CategoricalValue => self.values.keys().cloned().collect(),
            EntityKind::ExampleQuery => self.examples.keys().cloned().collect(),
        }
    }

    fn created_at_of(&self, kind: EntityKind, id: &str) -> i64 {
        match kind {
            EntityKind::Datasource => self.datasources.get(id).map(|e| e.created_at),
            EntityKind::Table => self.tables.get(id).map(|e| e.created_at),
            EntityKind::Column => self.columns.get(id).map(|e| e.created_at),
            EntityKind::Edge => self.edges.get(id).map(|e| e.created_at),
            EntityKind::Metric => self.metrics.get(id).map(|e| e.created_at),
            EntityKind::Synonym => self.synonyms.get(id).map(|e| e.created_at),
            EntityKind::ContextRule => self.rules.get(id).map(|e| e.created_at),
            EntityKind::CategoricalValue => self.values.get(id).map(|e| e.created_at),
            EntityKind::ExampleQuery => self.examples.get(id).map(|e| e.created_at),
        }
        .unwrap_or(0)
    }

    fn table_datasource(&self, table_id: &str) -> Option<&str> {
        self.tables.get(table_id).map(|t| t.datasource_id.as_str())
    }

    fn column_table(&self, column_id: &str) -> Option<&str> {
        self.columns.get(column_id).map(|c| c.table_id.as_str())
    }

    fn in_scope(&self, kind: EntityKind, id: &str, scope: &Scope) -> bool {
        if scope.is_unscoped() {
            return true;
        }
        match kind {
            EntityKind::Datasource | EntityKind::Synonym => true,
            EntityKind::Table => {
                let Some(table) = self.tables.get(id) else {
                    return false;
                };
                scope
                    .datasource_id
                    .as_deref()
                    .is_none_or(|ds| table.datasource_id == ds)
            }
            EntityKind::Column => {
                let Some(col) = self.columns.get(id) else {
                    return false;
                };
                let table_ok = scope.table_id.as_deref().is_none_or(|t| col.table_id == t);
                let ds_ok = scope.datasource_id.as_deref().is_none_or(|ds| {
                    self.table_datasource(&col.table_id) == Some(ds)
                });
                table_ok && ds_ok
            }
            EntityKind::Edge => {
                let Some(edge) = self.edges.get(id) else {
                    return false;
                };
                let st = self.column_table(&edge.source_column_id);
                let tt = self.column_table(&edge.target_column_id);
                let table_ok = scope
                    .table_id
                    .as_deref()
                    .is_none_or(|t| st == Some(t) || tt == Some(t));
                let ds_ok = scope.datasource_id.as_deref().is_none_or(|ds| {
                    st.and_then(|t| self.table_datasource(t)) == Some(ds)
                });
                table_ok && ds_ok
            }
            EntityKind::Metric => {
                let Some(m) = self.metrics.get(id) else {
                    return false;
                };
                scope
                    .datasource_id
                    .as_deref()
                    .is_none_or(|ds| m.datasource_id == ds)
            }
            EntityKind::ContextRule => {
                let Some(r) = self.rules.get(id) else {
                    return false;
                };
                self.column_in_scope(&r.column_id, scope)
            }
            EntityKind::CategoricalValue => {
                let Some(v) = self.values.get(id) else {
                    return false;
                };
                self.column_in_scope(&v.column_id, scope)
            }
            EntityKind::ExampleQuery => {
                let Some(ex) = self.examples.get(id) else {
                    return false;
                };
                scope
                    .datasource_id
                    .as_deref()
                    .is_none_or(|ds| ex.datasource_id == ds)
            }
        }
    }

    fn column_in_scope(&self, column_id: &str, scope: &Scope) -> bool {
        let column_ok = scope
            .column_id
            .as_deref()
            .is_none_or(|c| column_id == c);
        let table = self.column_table(column_id);
        let table_ok = scope.table_id.as_deref().is_none_or(|t| table == Some(t));
        let ds_ok = scope.datasource_id.as_deref().is_none_or(|ds| {
            table.and_then(|t| self.table_datasource(t)) == Some(ds)
        });
        column_ok && table_ok && ds_ok
    }
}

fn by_ids<T: Clone>(map: &HashMap<String, T>, ids: &[String]) -> Vec<T> {
    ids.iter().filter_map(|id| map.get(id).cloned()).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn datasource_id_by_slug(&self, slug: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .datasources
            .values()
            .find(|ds| ds.slug == slug)
            .map(|ds| ds.id.clone()))
    }

    async fn table_by_anchor(
        &self,
        datasource_id: Option<&str>,
        anchor: &str,
    ) -> Result<Option<TableNode>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .tables
            .values()
            .filter(|t| datasource_id.is_none_or(|ds| t.datasource_id == ds))
            .find(|t| t.slug == anchor || t.physical_name == anchor)
            .cloned())
    }

    async fn table_id_by_slug(
        &self,
        datasource_id: Option<&str>,
        slug: &str,
    ) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .tables
            .values()
            .filter(|t| datasource_id.is_none_or(|ds| t.datasource_id == ds))
            .find(|t| t.slug == slug)
            .map(|t| t.id.clone()))
    }

    async fn column_id_by_slug(&self, table_id: &str, slug: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .columns
            .values()
            .find(|c| c.table_id == table_id && c.slug == slug)
            .map(|c| c.id.clone()))
    }

    async fn lexical_search(
        &self,
        kind: EntityKind,
        query: &str,
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().unwrap();
        let mut scored: Vec<(String, usize)> = inner
            .ids_of(kind)
            .into_iter()
            .filter(|id| inner.in_scope(kind, id, scope))
            .filter_map(|id| {
                let text = inner.search_text_of(kind, &id)?.to_lowercase();
                let matches = terms.iter().filter(|t| text.contains(*t)).count();
                (matches > 0).then_some((id, matches))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k as usize);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn vector_search(
        &self,
        kind: EntityKind,
        query_vec: &[f32],
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let mut scored: Vec<(String, f64)> = inner
            .embeddings
            .iter()
            .filter(|((ek, id), _)| *ek == kind && inner.in_scope(kind, id, scope))
            .map(|((_, id), (vec, _))| {
                (id.clone(), cosine_similarity(query_vec, vec) as f64)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k as usize);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn list_ids(
        &self,
        kind: EntityKind,
        scope: &Scope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        let mut ids: Vec<String> = inner
            .ids_of(kind)
            .into_iter()
            .filter(|id| inner.in_scope(kind, id, scope))
            .collect();
        ids.sort_by(|a, b| {
            inner
                .created_at_of(kind, a)
                .cmp(&inner.created_at_of(kind, b))
                .then_with(|| a.cmp(b))
        });
        Ok(ids
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_ids(&self, kind: EntityKind, scope: &Scope) -> Result<i64> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .ids_of(kind)
            .into_iter()
            .filter(|id| inner.in_scope(kind, id, scope))
            .count() as i64)
    }

    async fn datasources_by_ids(&self, ids: &[String]) -> Result<Vec<Datasource>> {
        Ok(by_ids(&self.inner.read().unwrap().datasources, ids))
    }

    async fn tables_by_ids(&self, ids: &[String]) -> Result<Vec<TableNode>> {
        Ok(by_ids(&self.inner.read().unwrap().tables, ids))
    }

    async fn columns_by_ids(&self, ids: &[String]) -> Result<Vec<ColumnNode>> {
        Ok(by_ids(&self.inner.read().unwrap().columns, ids))
    }

    async fn edges_by_ids(&self, ids: &[String]) -> Result<Vec<SchemaEdge>> {
        Ok(by_ids(&self.inner.read().unwrap().edges, ids))
    }

    async fn metrics_by_ids(&self, ids: &[String]) -> Result<Vec<Metric>> {
        Ok(by_ids(&self.inner.read().unwrap().metrics, ids))
    }

    async fn synonyms_by_ids(&self, ids: &[String]) -> Result<Vec<Synonym>> {
        Ok(by_ids(&self.inner.read().unwrap().synonyms, ids))
    }

    async fn rules_by_ids(&self, ids: &[String]) -> Result<Vec<ContextRule>> {
        Ok(by_ids(&self.inner.read().unwrap().rules, ids))
    }

    async fn values_by_ids(&self, ids: &[String]) -> Result<Vec<CategoricalValue>> {
        Ok(by_ids(&self.inner.read().unwrap().values, ids))
    }

    async fn examples_by_ids(&self, ids: &[String]) -> Result<Vec<ExampleQuery>> {
        Ok(by_ids(&self.inner.read().unwrap().examples, ids))
    }

    async fn edge_endpoints(&self, datasource_id: Option<&str>) -> Result<Vec<EdgeEnds>> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for edge in inner.edges.values() {
            let (Some(st), Some(tt)) = (
                inner.column_table(&edge.source_column_id),
                inner.column_table(&edge.target_column_id),
            ) else {
                continue;
            };
            if let Some(ds) = datasource_id {
                if inner.table_datasource(st) != Some(ds) {
                    continue;
                }
            }
            out.push(EdgeEnds {
                edge: edge.clone(),
                source_table_id: st.to_string(),
                target_table_id: tt.to_string(),
            });
        }
        out.sort_by(|a, b| a.edge.id.cmp(&b.edge.id));
        Ok(out)
    }

    async fn searchable(&self, kind: EntityKind, id: &str) -> Result<Option<SearchableRecord>> {
        if kind == EntityKind::CategoricalValue {
            return Ok(None);
        }
        let inner = self.inner.read().unwrap();
        let Some(text) = inner.search_text_of(kind, id) else {
            return Ok(None);
        };
        let stored = inner.embeddings.get(&(kind, id.to_string()));
        Ok(Some(SearchableRecord {
            id: id.to_string(),
            search_text: text,
            fingerprint: stored.map(|(_, fp)| fp.clone()),
            embedding: stored.map(|(v, _)| v.clone()),
        }))
    }

    async fn pending_searchables(
        &self,
        kind: EntityKind,
        limit: Option<i64>,
    ) -> Result<Vec<SearchableRecord>> {
        if kind == EntityKind::CategoricalValue {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().unwrap();
        let mut ids = inner.ids_of(kind);
        ids.sort();

        let mut out = Vec::new();
        for id in ids {
            let Some(text) = inner.search_text_of(kind, &id) else {
                continue;
            };
            let stored = inner.embeddings.get(&(kind, id.clone()));
            let current = crate::cache::fingerprint(&text);
            if stored.map(|(_, fp)| fp.as_str()) != Some(current.as_str()) {
                out.push(SearchableRecord {
                    id,
                    search_text: text,
                    fingerprint: stored.map(|(_, fp)| fp.clone()),
                    embedding: stored.map(|(v, _)| v.clone()),
                });
                if let Some(l) = limit {
                    if out.len() as i64 >= l {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    async fn store_embedding(
        &self,
        kind: EntityKind,
        id: &str,
        vector: &[f32],
        fingerprint: &str,
    ) -> Result<()> {
        if kind == EntityKind::CategoricalValue {
            return Err(AtlasError::invalid(
                "categorical values are lexical-only and carry no embedding",
            ));
        }
        let mut inner = self.inner.write().unwrap();
        if inner.search_text_of(kind, id).is_none() {
            return Err(AtlasError::not_found(format!("{} {}", kind, id)));
        }
        inner
            .embeddings
            .insert((kind, id.to_string()), (vector.to_vec(), fingerprint.to_string()));
        Ok(())
    }

    async fn clear_embeddings(&self, kind: EntityKind) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.embeddings.retain(|(k, _), _| *k != kind);
        Ok(())
    }
}
