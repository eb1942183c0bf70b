//! Scatter-gather context resolver.
//!
//! Takes a heterogeneous list of `(entity kind, search text)` items, fans
//! the searches out as concurrent tasks, and merges every hit into one
//! deduplicated forest rooted at the datasources that contributed.
//!
//! Three stages, mirroring the classic scatter/infer/fetch pipeline:
//!
//! 1. **Scatter**: one task per item on a [`tokio::task::JoinSet`], each
//!    bounded by a per-item timeout; a global deadline covers the join.
//!    A late or failed item marks the response partial without aborting
//!    its siblings; callers assembling an LLM prompt prefer partial
//!    context over none.
//! 2. **Bubble up**: every hit pulls in its ancestry (rule/value to
//!    column to table to datasource, synonym to its target's chain, edge
//!    to both endpoint columns), as id sets with max-score bookkeeping.
//! 3. **Fetch & assemble**: one batched load per level, then assembly
//!    into datasource / tables / columns / rules+values, with metrics,
//!    synonyms, edges, and example queries attached at the datasource
//!    level (they may span tables). Merge order is commutative: nodes
//!    are keyed by id and sorted by slug, so sibling completion order
//!    never changes the output.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::ResolverConfig;
use crate::error::{AtlasError, Result};
use crate::models::{EntityKind, SynonymTarget};
use crate::search::{
    edge_hits, metric_hits, synonym_hits, ColumnHit, DatasourceHit, EdgeHit, ExampleQueryHit,
    MetricHit, RuleHit, SearchEngine, SynonymHit, TableHit, ValueHit,
};
use crate::store::Store;

/// One search request inside a resolution batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub kind: EntityKind,
    pub search_text: String,
    #[serde(default)]
    pub min_ratio_to_best: Option<f64>,
}

/// A column with its nested context.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnContext {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub semantic_name: Option<String>,
    pub data_type: String,
    pub is_primary_key: bool,
    pub description: Option<String>,
    pub context_note: Option<String>,
    pub score: Option<f64>,
    pub rules: Vec<RuleHit>,
    pub values: Vec<ValueHit>,
}

/// A table with its surfaced columns.
#[derive(Debug, Clone, Serialize)]
pub struct TableContext {
    pub id: String,
    pub slug: String,
    pub physical_name: String,
    pub semantic_name: String,
    pub description: Option<String>,
    pub ddl_context: Option<String>,
    pub score: Option<f64>,
    pub columns: Vec<ColumnContext>,
}

/// One root of the resolved forest.
#[derive(Debug, Clone, Serialize)]
pub struct DatasourceContext {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub engine: String,
    pub score: Option<f64>,
    pub tables: Vec<TableContext>,
    pub metrics: Vec<MetricHit>,
    pub synonyms: Vec<SynonymHit>,
    pub edges: Vec<EdgeHit>,
    pub example_queries: Vec<ExampleQueryHit>,
}

/// The merged resolution result.
#[derive(Debug, Clone, Serialize)]
pub struct ContextGraph {
    pub graph: Vec<DatasourceContext>,
    /// True when at least one item timed out or failed before the join.
    pub partial: bool,
    pub elapsed_ms: u64,
}

/// Hits from one resolved item, still typed by kind.
enum ItemHits {
    Datasources(Vec<DatasourceHit>),
    Tables(Vec<TableHit>),
    Columns(Vec<ColumnHit>),
    Edges(Vec<EdgeHit>),
    Metrics(Vec<MetricHit>),
    Synonyms(Vec<SynonymHit>),
    Rules(Vec<RuleHit>),
    Values(Vec<ValueHit>),
    Examples(Vec<ExampleQueryHit>),
}

async fn dispatch<S: Store>(
    engine: &SearchEngine<S>,
    item: &ContextItem,
    limit: i64,
) -> Result<ItemHits> {
    let q = item.search_text.as_str();
    let ratio = item.min_ratio_to_best;
    match item.kind {
        EntityKind::Datasource => Ok(ItemHits::Datasources(
            engine.search_datasources(q, 1, limit, ratio).await?.items,
        )),
        EntityKind::Table => Ok(ItemHits::Tables(
            engine.search_tables(q, None, 1, limit, ratio).await?.items,
        )),
        EntityKind::Column => Ok(ItemHits::Columns(
            engine
                .search_columns(q, None, None, 1, limit, ratio)
                .await?
                .items,
        )),
        EntityKind::Edge => Ok(ItemHits::Edges(
            engine
                .search_edges(q, None, None, 1, limit, ratio)
                .await?
                .items,
        )),
        EntityKind::Metric => Ok(ItemHits::Metrics(
            engine.search_metrics(q, None, 1, limit, ratio).await?.items,
        )),
        EntityKind::Synonym => Ok(ItemHits::Synonyms(
            engine.search_synonyms(q, 1, limit, ratio).await?.items,
        )),
        EntityKind::ContextRule => Ok(ItemHits::Rules(
            engine
                .search_rules(q, None, None, 1, limit, ratio)
                .await?
                .items,
        )),
        EntityKind::CategoricalValue => Ok(ItemHits::Values(
            engine
                .search_values(q, None, None, None, 1, limit, ratio)
                .await?
                .items,
        )),
        EntityKind::ExampleQuery => Ok(ItemHits::Examples(
            engine.search_examples(q, None, 1, limit, ratio).await?.items,
        )),
    }
}

/// Id sets and scores accumulated from raw hits (stage 2).
#[derive(Default)]
struct Collected {
    datasources: HashSet<String>,
    tables: HashSet<String>,
    columns: HashSet<String>,
    edges: HashSet<String>,
    metrics: HashSet<String>,
    synonyms: HashSet<String>,
    rules: HashSet<String>,
    values: HashSet<String>,
    examples: HashSet<String>,
    /// Max fused score per entity id across all items.
    scores: HashMap<String, f64>,
}

impl Collected {
    fn score(&mut self, id: &str, score: f64) {
        let entry = self.scores.entry(id.to_string()).or_insert(score);
        if score > *entry {
            *entry = score;
        }
    }

    fn absorb(&mut self, hits: &ItemHits) {
        match hits {
            ItemHits::Datasources(list) => {
                for h in list {
                    self.datasources.insert(h.id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Tables(list) => {
                for h in list {
                    self.tables.insert(h.id.clone());
                    self.datasources.insert(h.datasource_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Columns(list) => {
                for h in list {
                    self.columns.insert(h.id.clone());
                    self.tables.insert(h.table_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Edges(list) => {
                for h in list {
                    self.edges.insert(h.id.clone());
                    self.columns.insert(h.source_column_id.clone());
                    self.columns.insert(h.target_column_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Metrics(list) => {
                for h in list {
                    self.metrics.insert(h.id.clone());
                    self.datasources.insert(h.datasource_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Synonyms(list) => {
                for h in list {
                    self.synonyms.insert(h.id.clone());
                    self.score(&h.id, h.score);
                    match h.target_kind.as_str() {
                        "TABLE" => {
                            self.tables.insert(h.target_id.clone());
                        }
                        "COLUMN" => {
                            self.columns.insert(h.target_id.clone());
                        }
                        "METRIC" => {
                            self.metrics.insert(h.target_id.clone());
                        }
                        "VALUE" => {
                            self.values.insert(h.target_id.clone());
                        }
                        _ => {}
                    }
                }
            }
            ItemHits::Rules(list) => {
                for h in list {
                    self.rules.insert(h.id.clone());
                    self.columns.insert(h.column_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Values(list) => {
                for h in list {
                    self.values.insert(h.id.clone());
                    self.columns.insert(h.column_id.clone());
                    self.score(&h.id, h.score);
                }
            }
            ItemHits::Examples(list) => {
                for h in list {
                    self.examples.insert(h.id.clone());
                    self.datasources.insert(h.datasource_id.clone());
                    self.score(&h.id, h.score);
                }
            }
        }
    }
}

/// Orchestrates resolution over a shared [`SearchEngine`].
pub struct ContextResolver<S> {
    engine: Arc<SearchEngine<S>>,
    config: ResolverConfig,
}

impl<S: Store + 'static> ContextResolver<S> {
    pub fn new(engine: Arc<SearchEngine<S>>, config: ResolverConfig) -> Self {
        Self { engine, config }
    }

    pub async fn resolve(&self, items: Vec<ContextItem>) -> Result<ContextGraph> {
        let started = Instant::now();
        let item_timeout = Duration::from_millis(self.config.item_timeout_ms);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.request_timeout_ms);
        let limit = self.config.item_limit;

        let mut tasks: JoinSet<(usize, Result<ItemHits>)> = JoinSet::new();
        for (idx, item) in items.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(
                    item_timeout,
                    dispatch(engine.as_ref(), &item, limit),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AtlasError::upstream(
                        format!("context item {} ({})", idx, item.kind),
                        "timed out",
                    )),
                };
                (idx, outcome)
            });
        }

        let mut partial = false;
        let mut all_hits: Vec<ItemHits> = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                // Global deadline: keep what finished, drop the rest.
                Err(_) => {
                    warn!("context resolution hit global deadline, returning partial result");
                    partial = true;
                    tasks.abort_all();
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok((_, Ok(hits))))) => all_hits.push(hits),
                Ok(Some(Ok((idx, Err(e))))) => {
                    warn!(item = idx, error = %e, "context item failed");
                    partial = true;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "context task panicked or was cancelled");
                    partial = true;
                }
            }
        }

        let mut collected = Collected::default();
        for hits in &all_hits {
            collected.absorb(hits);
        }

        let graph = self.assemble(collected).await?;

        Ok(ContextGraph {
            graph,
            partial,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Stages 2+3: bubble leaf hits up the ownership chain, bulk-fetch
    /// each level once, and assemble the forest.
    async fn assemble(&self, mut c: Collected) -> Result<Vec<DatasourceContext>> {
        let store = self.engine.store();

        // Leaves first: rules and values pull in their columns.
        let rules = store.rules_by_ids(&to_vec(&c.rules)).await?;
        for r in &rules {
            c.columns.insert(r.column_id.clone());
        }
        let values = store.values_by_ids(&to_vec(&c.values)).await?;
        for v in &values {
            c.columns.insert(v.column_id.clone());
        }
        let edges = store.edges_by_ids(&to_vec(&c.edges)).await?;
        for e in &edges {
            c.columns.insert(e.source_column_id.clone());
            c.columns.insert(e.target_column_id.clone());
        }

        // Columns pull in tables, tables pull in datasources.
        let columns = store.columns_by_ids(&to_vec(&c.columns)).await?;
        for col in &columns {
            c.tables.insert(col.table_id.clone());
        }
        let tables = store.tables_by_ids(&to_vec(&c.tables)).await?;
        for t in &tables {
            c.datasources.insert(t.datasource_id.clone());
        }

        let metrics = store.metrics_by_ids(&to_vec(&c.metrics)).await?;
        for m in &metrics {
            c.datasources.insert(m.datasource_id.clone());
        }
        let examples = store.examples_by_ids(&to_vec(&c.examples)).await?;
        for ex in &examples {
            c.datasources.insert(ex.datasource_id.clone());
        }
        let synonyms = store.synonyms_by_ids(&to_vec(&c.synonyms)).await?;

        if c.datasources.is_empty() {
            return Ok(Vec::new());
        }
        let datasources = store.datasources_by_ids(&to_vec(&c.datasources)).await?;

        // Kept for synonym target attribution after the entity lists are
        // consumed into the tree below.
        let value_col_ids: HashMap<String, String> = values
            .iter()
            .map(|v| (v.id.clone(), v.column_id.clone()))
            .collect();
        let metric_ds_ids: HashMap<String, String> = metrics
            .iter()
            .map(|m| (m.id.clone(), m.datasource_id.clone()))
            .collect();

        // Lookup maps for attachment decisions.
        let table_by_id: HashMap<&str, &crate::models::TableNode> =
            tables.iter().map(|t| (t.id.as_str(), t)).collect();
        let column_table: HashMap<&str, &str> = columns
            .iter()
            .map(|col| (col.id.as_str(), col.table_id.as_str()))
            .collect();
        let table_ds = |table_id: &str| -> Option<&str> {
            table_by_id.get(table_id).map(|t| t.datasource_id.as_str())
        };
        let column_ds = |column_id: &str| -> Option<&str> {
            column_table.get(column_id).and_then(|t| table_ds(t))
        };

        let score_of = |id: &str| c.scores.get(id).copied();
        let ranked_of = |ids: Vec<String>| -> Vec<(String, f64)> {
            ids.into_iter()
                .map(|id| {
                    let s = c.scores.get(&id).copied().unwrap_or(0.0);
                    (id, s)
                })
                .collect()
        };

        // Nested rule/value hits, grouped per column.
        let col_slug: HashMap<&str, &str> = columns
            .iter()
            .map(|col| (col.id.as_str(), col.slug.as_str()))
            .collect();
        let table_slug_of_col = |column_id: &str| -> String {
            column_table
                .get(column_id)
                .and_then(|t| table_by_id.get(t))
                .map(|t| t.slug.clone())
                .unwrap_or_else(|| "unknown".to_string())
        };

        let mut rules_by_col: HashMap<String, Vec<RuleHit>> = HashMap::new();
        for r in &rules {
            rules_by_col
                .entry(r.column_id.clone())
                .or_default()
                .push(RuleHit {
                    id: r.id.clone(),
                    column_id: r.column_id.clone(),
                    column_slug: col_slug
                        .get(r.column_id.as_str())
                        .unwrap_or(&"unknown")
                        .to_string(),
                    table_slug: table_slug_of_col(&r.column_id),
                    slug: r.slug.clone(),
                    rule_text: r.rule_text.clone(),
                    score: score_of(&r.id).unwrap_or(0.0),
                });
        }
        let mut values_by_col: HashMap<String, Vec<ValueHit>> = HashMap::new();
        for v in &values {
            values_by_col
                .entry(v.column_id.clone())
                .or_default()
                .push(ValueHit {
                    id: v.id.clone(),
                    column_id: v.column_id.clone(),
                    column_slug: col_slug
                        .get(v.column_id.as_str())
                        .unwrap_or(&"unknown")
                        .to_string(),
                    table_slug: table_slug_of_col(&v.column_id),
                    slug: v.slug.clone(),
                    value_raw: v.value_raw.clone(),
                    value_label: v.value_label.clone(),
                    score: score_of(&v.id).unwrap_or(0.0),
                });
        }

        // Columns grouped per table.
        let mut columns_by_table: HashMap<String, Vec<ColumnContext>> = HashMap::new();
        for col in &columns {
            let mut rules = rules_by_col.remove(&col.id).unwrap_or_default();
            rules.sort_by(|a, b| a.slug.cmp(&b.slug));
            let mut vals = values_by_col.remove(&col.id).unwrap_or_default();
            vals.sort_by(|a, b| a.slug.cmp(&b.slug));
            columns_by_table
                .entry(col.table_id.clone())
                .or_default()
                .push(ColumnContext {
                    id: col.id.clone(),
                    slug: col.slug.clone(),
                    name: col.name.clone(),
                    semantic_name: col.semantic_name.clone(),
                    data_type: col.data_type.clone(),
                    is_primary_key: col.is_primary_key,
                    description: col.description.clone(),
                    context_note: col.context_note.clone(),
                    score: score_of(&col.id),
                    rules,
                    values: vals,
                });
        }

        // Tables grouped per datasource.
        let mut tables_by_ds: HashMap<String, Vec<TableContext>> = HashMap::new();
        for t in &tables {
            let mut cols = columns_by_table.remove(&t.id).unwrap_or_default();
            cols.sort_by(|a, b| a.slug.cmp(&b.slug));
            tables_by_ds
                .entry(t.datasource_id.clone())
                .or_default()
                .push(TableContext {
                    id: t.id.clone(),
                    slug: t.slug.clone(),
                    physical_name: t.physical_name.clone(),
                    semantic_name: t.semantic_name.clone(),
                    description: t.description.clone(),
                    ddl_context: t.ddl_context.clone(),
                    score: score_of(&t.id),
                    columns: cols,
                });
        }

        // Datasource-level attachments: metrics, examples, edges, synonyms.
        let mut metrics_by_ds: HashMap<String, Vec<MetricHit>> = HashMap::new();
        {
            let mut sorted = metrics;
            sorted.sort_by(|a, b| a.slug.cmp(&b.slug));
            let ranked = ranked_of(sorted.iter().map(|m| m.id.clone()).collect());
            for hit in metric_hits(store.as_ref(), &ranked, sorted).await? {
                metrics_by_ds
                    .entry(hit.datasource_id.clone())
                    .or_default()
                    .push(hit);
            }
        }

        let mut examples_by_ds: HashMap<String, Vec<ExampleQueryHit>> = HashMap::new();
        {
            let mut sorted = examples;
            sorted.sort_by(|a, b| a.slug.cmp(&b.slug));
            let ranked = ranked_of(sorted.iter().map(|e| e.id.clone()).collect());
            for hit in crate::search::example_hits(&ranked, sorted) {
                examples_by_ds
                    .entry(hit.datasource_id.clone())
                    .or_default()
                    .push(hit);
            }
        }

        // Edges attach to their source table's datasource, and only when
        // both endpoint tables made it into the merged graph.
        let mut edges_by_ds: HashMap<String, Vec<EdgeHit>> = HashMap::new();
        {
            let present: Vec<crate::models::SchemaEdge> = edges
                .into_iter()
                .filter(|e| {
                    column_ds(&e.source_column_id).is_some()
                        && column_ds(&e.target_column_id).is_some()
                })
                .collect();
            let mut sorted = present;
            sorted.sort_by(|a, b| a.id.cmp(&b.id));
            let ds_of: Vec<Option<String>> = sorted
                .iter()
                .map(|e| column_ds(&e.source_column_id).map(|s| s.to_string()))
                .collect();
            let ranked = ranked_of(sorted.iter().map(|e| e.id.clone()).collect());
            let hits = edge_hits(store.as_ref(), &ranked, sorted).await?;
            for (hit, ds) in hits.into_iter().zip(ds_of) {
                if let Some(ds) = ds {
                    edges_by_ds.entry(ds).or_default().push(hit);
                }
            }
        }

        let mut synonyms_by_ds: HashMap<String, Vec<SynonymHit>> = HashMap::new();
        {
            let mut sorted = synonyms;
            sorted.sort_by(|a, b| a.term.cmp(&b.term));
            let target_ds: Vec<Option<String>> = sorted
                .iter()
                .map(|syn| match &syn.target {
                    SynonymTarget::Table(id) => table_ds(id).map(|s| s.to_string()),
                    SynonymTarget::Column(id) => column_ds(id).map(|s| s.to_string()),
                    SynonymTarget::Metric(id) => metric_ds_ids.get(id).cloned(),
                    SynonymTarget::Value(id) => value_col_ids
                        .get(id)
                        .and_then(|col| column_ds(col))
                        .map(|s| s.to_string()),
                })
                .collect();
            let ranked = ranked_of(sorted.iter().map(|s| s.id.clone()).collect());
            let hits = synonym_hits(store.as_ref(), &ranked, sorted).await?;
            for (hit, ds) in hits.into_iter().zip(target_ds) {
                if let Some(ds) = ds {
                    synonyms_by_ds.entry(ds).or_default().push(hit);
                }
            }
        }

        let mut graph: Vec<DatasourceContext> = datasources
            .into_iter()
            .map(|ds| {
                let mut ds_tables = tables_by_ds.remove(&ds.id).unwrap_or_default();
                ds_tables.sort_by(|a, b| a.slug.cmp(&b.slug));
                DatasourceContext {
                    score: score_of(&ds.id),
                    tables: ds_tables,
                    metrics: metrics_by_ds.remove(&ds.id).unwrap_or_default(),
                    synonyms: synonyms_by_ds.remove(&ds.id).unwrap_or_default(),
                    edges: edges_by_ds.remove(&ds.id).unwrap_or_default(),
                    example_queries: examples_by_ds.remove(&ds.id).unwrap_or_default(),
                    id: ds.id,
                    slug: ds.slug,
                    name: ds.name,
                    description: ds.description,
                    engine: ds.engine.as_str().to_string(),
                }
            })
            .collect();
        graph.sort_by(|a, b| a.slug.cmp(&b.slug));

        Ok(graph)
    }
}

fn to_vec(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}
