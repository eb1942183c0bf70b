//! End-to-end tests over the in-memory store: hybrid search, path
//! finding, context resolution, and the embedding cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use schema_atlas::cache::{fingerprint, EmbeddingCache};
use schema_atlas::config::{ResolverConfig, RetrievalConfig};
use schema_atlas::embedding::Embedder;
use schema_atlas::graph::{find_paths, PathRequest};
use schema_atlas::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EngineDialect, EntityKind,
    ExampleQuery, Metric, RelationshipKind, SchemaEdge, Synonym, SynonymTarget, TableNode,
};
use schema_atlas::resolve::{ContextItem, ContextResolver};
use schema_atlas::search::SearchEngine;
use schema_atlas::store::memory::MemoryStore;

// ============ Stub embedder ============

/// Deterministic bag-of-tokens embedder. Counts calls; sleeps when the
/// text contains "slow" so timeout behavior can be exercised.
struct StubEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for token in text.to_lowercase().split_whitespace() {
            let idx = token.bytes().map(|b| b as usize).sum::<usize>() % 8;
            v[idx] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("stub embedder down");
        }
        if text.contains("slow") {
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        }
        Ok(Self::vector_for(text))
    }
}

// ============ Fixture ============

fn ts(slug: &str) -> String {
    slug.to_string()
}

fn fixture() -> MemoryStore {
    let store = MemoryStore::new();

    store.insert_datasource(Datasource {
        id: ts("ds1"),
        name: "Sales DWH".into(),
        slug: "sales".into(),
        description: Some("Production sales data warehouse".into()),
        engine: EngineDialect::Postgres,
        context_signature: Some("orders customers revenue".into()),
        created_at: 1,
        updated_at: 1,
    });
    store.insert_datasource(Datasource {
        id: ts("ds2"),
        name: "Marketing".into(),
        slug: "marketing".into(),
        description: Some("Campaign analytics".into()),
        engine: EngineDialect::Bigquery,
        context_signature: Some("campaigns clicks".into()),
        created_at: 2,
        updated_at: 2,
    });

    store.insert_table(TableNode {
        id: ts("t1"),
        datasource_id: ts("ds1"),
        physical_name: "t_orders".into(),
        slug: "orders".into(),
        semantic_name: "Orders".into(),
        description: Some("All customer orders".into()),
        ddl_context: Some("CREATE TABLE t_orders (...)".into()),
        created_at: 1,
        updated_at: 1,
    });
    store.insert_table(TableNode {
        id: ts("t2"),
        datasource_id: ts("ds1"),
        physical_name: "t_customers".into(),
        slug: "customers".into(),
        semantic_name: "Customers".into(),
        description: Some("Customer master data".into()),
        created_at: 2,
        updated_at: 2,
        ddl_context: None,
    });
    store.insert_table(TableNode {
        id: ts("t3"),
        datasource_id: ts("ds2"),
        physical_name: "t_campaigns".into(),
        slug: "campaigns".into(),
        semantic_name: "Campaigns".into(),
        description: Some("Marketing campaigns and customer touchpoints".into()),
        ddl_context: None,
        created_at: 3,
        updated_at: 3,
    });

    store.insert_column(ColumnNode {
        id: ts("c1"),
        table_id: ts("t1"),
        name: "customer_id".into(),
        slug: "customer-id".into(),
        semantic_name: Some("Customer ID".into()),
        data_type: "INT".into(),
        is_primary_key: false,
        description: Some("Customer who placed the order".into()),
        context_note: None,
        created_at: 1,
        updated_at: 1,
    });
    store.insert_column(ColumnNode {
        id: ts("c2"),
        table_id: ts("t1"),
        name: "status".into(),
        slug: "status".into(),
        semantic_name: Some("Order Status".into()),
        data_type: "VARCHAR(16)".into(),
        is_primary_key: false,
        description: Some("Lifecycle status of the order".into()),
        context_note: None,
        created_at: 2,
        updated_at: 2,
    });
    store.insert_column(ColumnNode {
        id: ts("c3"),
        table_id: ts("t2"),
        name: "id".into(),
        slug: "id".into(),
        semantic_name: Some("Customer ID".into()),
        data_type: "INT".into(),
        is_primary_key: true,
        description: Some("Primary key".into()),
        context_note: None,
        created_at: 3,
        updated_at: 3,
    });

    store.insert_edge(SchemaEdge {
        id: ts("e1"),
        source_column_id: ts("c1"),
        target_column_id: ts("c3"),
        relationship: RelationshipKind::ManyToOne,
        is_inferred: false,
        description: Some("Customer who placed the order".into()),
        context_note: None,
        created_at: 1,
    });

    store.insert_metric(Metric {
        id: ts("m1"),
        datasource_id: ts("ds1"),
        name: "Total Revenue".into(),
        slug: "total-revenue".into(),
        description: Some("Gross revenue across all orders".into()),
        calculation_sql: "SUM(amount_total)".into(),
        required_tables: vec![ts("t1")],
        filter_condition: None,
        created_at: 1,
        updated_at: 1,
    });

    store.insert_rule(ContextRule {
        id: ts("r1"),
        column_id: ts("c2"),
        slug: "cancelled-status".into(),
        rule_text: "status = 'X' means the order was cancelled".into(),
        created_at: 1,
        updated_at: 1,
    });

    store.insert_value(CategoricalValue {
        id: ts("v1"),
        column_id: ts("c2"),
        slug: "status-active".into(),
        value_raw: "A".into(),
        value_label: "Active".into(),
        created_at: 1,
        updated_at: 1,
    });

    store.insert_synonym(Synonym {
        id: ts("s1"),
        term: "clients".into(),
        slug: "clients".into(),
        target: SynonymTarget::Table(ts("t2")),
        created_at: 1,
    });

    store.insert_example(ExampleQuery {
        id: ts("g1"),
        datasource_id: ts("ds1"),
        slug: "orders-last-month".into(),
        prompt_text: "How many orders were placed last month".into(),
        sql_query: "SELECT COUNT(*) FROM t_orders WHERE ...".into(),
        complexity_score: 2,
        verified: true,
        created_at: 1,
        updated_at: 1,
    });

    store
}

fn engine_with(
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
) -> Arc<SearchEngine<MemoryStore>> {
    Arc::new(SearchEngine::new(
        store,
        embedder,
        RetrievalConfig::default(),
    ))
}

fn resolver_config(item_timeout_ms: u64) -> ResolverConfig {
    ResolverConfig {
        item_limit: 5,
        item_timeout_ms,
        request_timeout_ms: 5_000,
    }
}

/// Seed table embeddings the way the write path would.
fn seed_table_embeddings(store: &MemoryStore) {
    for (id, text) in [
        ("t1", "Orders All customer orders"),
        ("t2", "Customers Customer master data"),
        ("t3", "Campaigns Marketing campaigns and customer touchpoints"),
    ] {
        store.set_embedding(
            EntityKind::Table,
            id,
            StubEmbedder::vector_for(text),
            &fingerprint(text),
        );
    }
}

// ============ Path finding ============

#[tokio::test]
async fn test_end_to_end_orders_customers_path() {
    let store = fixture();
    let request = PathRequest {
        source: "orders".into(),
        target: "customers".into(),
        datasource_slug: None,
        max_depth: 2,
    };
    let result = find_paths(&store, &request, 10_000).await.unwrap();

    assert_eq!(result.total_paths, 1);
    assert!(!result.truncated);
    assert_eq!(result.source_table, "t_orders");
    assert_eq!(result.target_table, "t_customers");

    let path = &result.paths[0];
    assert_eq!(path.len(), 1);
    let hop = &path[0];
    assert_eq!(hop.source.table_slug, "orders");
    assert_eq!(hop.source.column_name, "customer_id");
    assert_eq!(hop.target.table_slug, "customers");
    assert_eq!(hop.target.column_name, "id");
    assert_eq!(hop.relationship, RelationshipKind::ManyToOne);
    assert!(!hop.is_inferred);
}

#[tokio::test]
async fn test_datasource_scope_blocks_cross_datasource_paths() {
    let store = fixture();
    let request = PathRequest {
        source: "orders".into(),
        target: "campaigns".into(),
        datasource_slug: Some("sales".into()),
        max_depth: 3,
    };
    // The campaigns table lives in another datasource: bad anchor, not
    // an empty result.
    let err = find_paths(&store, &request, 10_000).await.unwrap_err();
    assert!(err.to_string().contains("campaigns"));
}

// ============ Hybrid search ============

#[tokio::test]
async fn test_search_tables_hybrid_finds_and_ranks() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    let page = engine
        .search_tables("customer orders", None, 1, 10, None)
        .await
        .unwrap();

    assert!(!page.items.is_empty());
    let slugs: Vec<&str> = page.items.iter().map(|h| h.slug.as_str()).collect();
    assert!(slugs.contains(&"orders"));
    // Scores descend.
    for pair in page.items.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_search_determinism() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    let a = engine
        .search_tables("customer orders", None, 1, 10, None)
        .await
        .unwrap();
    let b = engine
        .search_tables("customer orders", None, 1, 10, None)
        .await
        .unwrap();

    let ids_a: Vec<_> = a.items.iter().map(|h| (h.id.clone(), h.score)).collect();
    let ids_b: Vec<_> = b.items.iter().map(|h| (h.id.clone(), h.score)).collect();
    assert_eq!(ids_a, ids_b);
}

#[tokio::test]
async fn test_scope_filter_never_leaks() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    // "customer" also matches the campaigns table description, but the
    // sales scope must exclude it.
    let page = engine
        .search_tables("customer", Some("sales"), 1, 10, None)
        .await
        .unwrap();
    assert!(!page.items.is_empty());
    for hit in &page.items {
        assert_eq!(hit.datasource_id, "ds1");
    }

    // Unknown scope slug: empty page, not an error.
    let missing = engine
        .search_tables("customer", Some("nope"), 1, 10, None)
        .await
        .unwrap();
    assert_eq!(missing.total, 0);
    assert!(missing.items.is_empty());
}

#[tokio::test]
async fn test_vector_branch_failure_degrades_to_lexical() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::failing()));

    let page = engine
        .search_tables("orders", None, 1, 10, None)
        .await
        .unwrap();
    assert!(page.items.iter().any(|h| h.slug == "orders"));
}

#[tokio::test]
async fn test_empty_query_policy() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    // Tables list unranked with score 1.0.
    let tables = engine.search_tables("", None, 1, 10, None).await.unwrap();
    assert_eq!(tables.total, 3);
    assert!(tables.items.iter().all(|h| h.score == 1.0));

    // Example queries return nothing on a blank prompt.
    let examples = engine.search_examples("", None, 1, 10, None).await.unwrap();
    assert_eq!(examples.total, 0);
    assert!(examples.items.is_empty());
}

#[tokio::test]
async fn test_column_hits_carry_table_denormalization() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    let page = engine
        .search_columns("customer", None, None, 1, 10, None)
        .await
        .unwrap();
    let hit = page
        .items
        .iter()
        .find(|h| h.slug == "customer-id")
        .expect("customer-id column found");
    assert_eq!(hit.table_slug, "orders");
    assert_eq!(hit.data_type, "INT");
    assert!(!hit.is_primary_key);
}

#[tokio::test]
async fn test_synonym_hit_resolves_target_slug() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    let page = engine.search_synonyms("clients", 1, 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].maps_to_slug, "customers");
    assert_eq!(page.items[0].target_kind, "TABLE");
}

#[tokio::test]
async fn test_invalid_pagination_rejected() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));

    assert!(engine.search_tables("x", None, 0, 10, None).await.is_err());
    assert!(engine.search_tables("x", None, 1, 0, None).await.is_err());
    assert!(engine
        .search_tables("x", None, 1, 10, Some(1.5))
        .await
        .is_err());
}

// ============ Embedding cache ============

#[tokio::test]
async fn test_cache_skips_unchanged_content() {
    let store = fixture();
    let stub = Arc::new(StubEmbedder::new());
    let cache = EmbeddingCache::new(stub.clone());

    let first = cache.ensure(&store, EntityKind::Table, "t1").await.unwrap();
    assert!(first.updated);
    let second = cache.ensure(&store, EntityKind::Table, "t1").await.unwrap();
    assert!(!second.updated);
    assert_eq!(first.vector, second.vector);

    // The external generator ran exactly once across both calls.
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test]
async fn test_cache_failure_leaves_state_for_retry() {
    let store = fixture();
    let failing = Arc::new(StubEmbedder::failing());
    let cache = EmbeddingCache::new(failing);

    let err = cache.ensure(&store, EntityKind::Table, "t1").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.embedding_count(EntityKind::Table), 0);

    // A healthy provider succeeds on the retry.
    let cache = EmbeddingCache::new(Arc::new(StubEmbedder::new()));
    let ensured = cache.ensure(&store, EntityKind::Table, "t1").await.unwrap();
    assert!(ensured.updated);
    assert_eq!(store.embedding_count(EntityKind::Table), 1);
}

#[tokio::test]
async fn test_cache_rejects_lexical_only_kind() {
    let store = fixture();
    let cache = EmbeddingCache::new(Arc::new(StubEmbedder::new()));
    assert!(cache
        .ensure(&store, EntityKind::CategoricalValue, "v1")
        .await
        .is_err());
}

// ============ Context resolution ============

#[tokio::test]
async fn test_resolve_bubbles_hierarchy() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));
    let resolver = ContextResolver::new(engine, resolver_config(2_000));

    let graph = resolver
        .resolve(vec![ContextItem {
            kind: EntityKind::ContextRule,
            search_text: "cancelled".into(),
            min_ratio_to_best: None,
        }])
        .await
        .unwrap();

    assert!(!graph.partial);
    assert_eq!(graph.graph.len(), 1);
    let ds = &graph.graph[0];
    assert_eq!(ds.slug, "sales");
    // Rule bubbled into column, column into table.
    let table = ds.tables.iter().find(|t| t.slug == "orders").unwrap();
    let column = table.columns.iter().find(|c| c.slug == "status").unwrap();
    assert_eq!(column.rules.len(), 1);
    assert_eq!(column.rules[0].slug, "cancelled-status");
}

#[tokio::test]
async fn test_resolve_merge_is_idempotent() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));
    let resolver = ContextResolver::new(engine, resolver_config(2_000));

    let item = ContextItem {
        kind: EntityKind::Table,
        search_text: "orders".into(),
        min_ratio_to_best: None,
    };

    let once = resolver.resolve(vec![item.clone()]).await.unwrap();
    let twice = resolver.resolve(vec![item.clone(), item]).await.unwrap();

    let a = serde_json::to_value(&once.graph).unwrap();
    let b = serde_json::to_value(&twice.graph).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_resolve_partial_on_item_timeout() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));
    let resolver = ContextResolver::new(engine, resolver_config(100));

    let graph = resolver
        .resolve(vec![
            ContextItem {
                kind: EntityKind::Table,
                search_text: "orders".into(),
                min_ratio_to_best: None,
            },
            ContextItem {
                kind: EntityKind::Metric,
                search_text: "revenue".into(),
                min_ratio_to_best: None,
            },
            ContextItem {
                kind: EntityKind::Table,
                search_text: "slow customers".into(),
                min_ratio_to_best: None,
            },
        ])
        .await
        .unwrap();

    assert!(graph.partial);
    // The two fast sub-searches still contributed.
    let ds = graph.graph.iter().find(|d| d.slug == "sales").unwrap();
    assert!(ds.tables.iter().any(|t| t.slug == "orders"));
    assert!(ds.metrics.iter().any(|m| m.slug == "total-revenue"));
}

#[tokio::test]
async fn test_resolve_empty_items_is_empty_forest() {
    let store = Arc::new(fixture());
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));
    let resolver = ContextResolver::new(engine, resolver_config(2_000));

    let graph = resolver.resolve(Vec::new()).await.unwrap();
    assert!(graph.graph.is_empty());
    assert!(!graph.partial);
}

#[tokio::test]
async fn test_resolve_attaches_datasource_level_entities() {
    let store = Arc::new(fixture());
    seed_table_embeddings(&store);
    let engine = engine_with(Arc::clone(&store), Arc::new(StubEmbedder::new()));
    let resolver = ContextResolver::new(engine, resolver_config(2_000));

    let graph = resolver
        .resolve(vec![
            ContextItem {
                kind: EntityKind::Edge,
                search_text: "placed the order".into(),
                min_ratio_to_best: None,
            },
            ContextItem {
                kind: EntityKind::ExampleQuery,
                search_text: "orders last month".into(),
                min_ratio_to_best: None,
            },
            ContextItem {
                kind: EntityKind::Synonym,
                search_text: "clients".into(),
                min_ratio_to_best: None,
            },
        ])
        .await
        .unwrap();

    assert!(!graph.partial);
    let ds = graph.graph.iter().find(|d| d.slug == "sales").unwrap();
    assert_eq!(ds.edges.len(), 1);
    assert_eq!(ds.edges[0].source, "orders.customer-id");
    assert_eq!(ds.edges[0].target, "customers.id");
    assert!(ds.example_queries.iter().any(|e| e.slug == "orders-last-month"));
    assert!(ds.synonyms.iter().any(|s| s.term == "clients"));
    // Edge endpoints pulled both tables into the graph.
    assert!(ds.tables.iter().any(|t| t.slug == "orders"));
    assert!(ds.tables.iter().any(|t| t.slug == "customers"));
}
