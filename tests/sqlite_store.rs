//! SQLite backend tests: schema creation, FTS-backed lexical search,
//! vector search over BLOB embeddings, scope filtering, and the
//! embedding write path.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use schema_atlas::cache::fingerprint;
use schema_atlas::embedding::DisabledEmbedder;
use schema_atlas::graph::{find_paths, PathRequest};
use schema_atlas::migrate::create_schema;
use schema_atlas::models::{
    ColumnNode, Datasource, EngineDialect, EntityKind, Metric, RelationshipKind, SchemaEdge,
    TableNode,
};
use schema_atlas::search::SearchEngine;
use schema_atlas::store::sqlite::SqliteStore;
use schema_atlas::store::{Scope, Store};

async fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
    let path = dir.path().join("atlas.db");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    SqliteStore::new(pool)
}

async fn seed(store: &SqliteStore) {
    store
        .upsert_datasource(&Datasource {
            id: "ds1".into(),
            name: "Sales DWH".into(),
            slug: "sales".into(),
            description: Some("Production sales data warehouse".into()),
            engine: EngineDialect::Postgres,
            context_signature: Some("orders customers revenue".into()),
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();

    store
        .upsert_table(&TableNode {
            id: "t1".into(),
            datasource_id: "ds1".into(),
            physical_name: "t_orders".into(),
            slug: "orders".into(),
            semantic_name: "Orders".into(),
            description: Some("All customer orders".into()),
            ddl_context: None,
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();
    store
        .upsert_table(&TableNode {
            id: "t2".into(),
            datasource_id: "ds1".into(),
            physical_name: "t_customers".into(),
            slug: "customers".into(),
            semantic_name: "Customers".into(),
            description: Some("Customer master data".into()),
            ddl_context: None,
            created_at: 2,
            updated_at: 2,
        })
        .await
        .unwrap();

    store
        .upsert_column(&ColumnNode {
            id: "c1".into(),
            table_id: "t1".into(),
            name: "customer_id".into(),
            slug: "customer-id".into(),
            semantic_name: Some("Customer ID".into()),
            data_type: "INT".into(),
            is_primary_key: false,
            description: Some("Customer who placed the order".into()),
            context_note: None,
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();
    store
        .upsert_column(&ColumnNode {
            id: "c2".into(),
            table_id: "t2".into(),
            name: "id".into(),
            slug: "id".into(),
            semantic_name: Some("Customer ID".into()),
            data_type: "INT".into(),
            is_primary_key: true,
            description: Some("Primary key".into()),
            context_note: None,
            created_at: 2,
            updated_at: 2,
        })
        .await
        .unwrap();

    store
        .upsert_edge(&SchemaEdge {
            id: "e1".into(),
            source_column_id: "c1".into(),
            target_column_id: "c2".into(),
            relationship: RelationshipKind::ManyToOne,
            is_inferred: false,
            description: Some("Customer who placed the order".into()),
            context_note: None,
            created_at: 1,
        })
        .await
        .unwrap();

    store
        .upsert_metric(&Metric {
            id: "m1".into(),
            datasource_id: "ds1".into(),
            name: "Total Revenue".into(),
            slug: "total-revenue".into(),
            description: Some("Gross revenue across all orders".into()),
            calculation_sql: "SUM(amount_total)".into(),
            required_tables: vec!["t1".into()],
            filter_condition: None,
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fts_lexical_search_and_scope() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed(&store).await;

    let hits = store
        .lexical_search(EntityKind::Table, "orders", &Scope::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits, vec!["t1".to_string()]);

    // Scope by datasource id.
    let scoped = store
        .lexical_search(
            EntityKind::Table,
            "customer",
            &Scope::datasource("ds1"),
            10,
        )
        .await
        .unwrap();
    assert!(!scoped.is_empty());

    let other = store
        .lexical_search(
            EntityKind::Table,
            "customer",
            &Scope::datasource("missing"),
            10,
        )
        .await
        .unwrap();
    assert!(other.is_empty());

    // Quote-laden input must not produce an FTS syntax error.
    let weird = store
        .lexical_search(EntityKind::Table, "\"orders", &Scope::default(), 10)
        .await;
    assert!(weird.is_ok());
}

#[tokio::test]
async fn test_upsert_refreshes_fts_text() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed(&store).await;

    // Rename the table; the old term must stop matching.
    store
        .upsert_table(&TableNode {
            id: "t1".into(),
            datasource_id: "ds1".into(),
            physical_name: "t_orders".into(),
            slug: "orders".into(),
            semantic_name: "Shipments".into(),
            description: Some("All shipments".into()),
            ddl_context: None,
            created_at: 1,
            updated_at: 5,
        })
        .await
        .unwrap();

    let old = store
        .lexical_search(EntityKind::Table, "orders", &Scope::default(), 10)
        .await
        .unwrap();
    assert!(old.is_empty());

    let new = store
        .lexical_search(EntityKind::Table, "shipments", &Scope::default(), 10)
        .await
        .unwrap();
    assert_eq!(new, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_vector_search_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed(&store).await;

    store
        .store_embedding(EntityKind::Table, "t1", &[1.0, 0.0, 0.0], "fp1")
        .await
        .unwrap();
    store
        .store_embedding(EntityKind::Table, "t2", &[0.0, 1.0, 0.0], "fp2")
        .await
        .unwrap();

    let nearest = store
        .vector_search(EntityKind::Table, &[0.9, 0.1, 0.0], &Scope::default(), 2)
        .await
        .unwrap();
    assert_eq!(nearest.first().map(String::as_str), Some("t1"));
}

#[tokio::test]
async fn test_pending_searchables_tracks_fingerprints() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed(&store).await;

    let pending = store
        .pending_searchables(EntityKind::Table, None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    // Store one embedding with the current fingerprint; it leaves the
    // pending set.
    let rec = store
        .searchable(EntityKind::Table, "t1")
        .await
        .unwrap()
        .unwrap();
    store
        .store_embedding(
            EntityKind::Table,
            "t1",
            &[0.5, 0.5],
            &fingerprint(&rec.search_text),
        )
        .await
        .unwrap();

    let pending = store
        .pending_searchables(EntityKind::Table, None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "t2");
}

#[tokio::test]
async fn test_find_paths_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed(&store).await;

    let request = PathRequest {
        source: "orders".into(),
        target: "customers".into(),
        datasource_slug: Some("sales".into()),
        max_depth: 2,
    };
    let result = find_paths(&store, &request, 10_000).await.unwrap();
    assert_eq!(result.total_paths, 1);
    assert_eq!(result.paths[0][0].source.column_name, "customer_id");
}

#[tokio::test]
async fn test_engine_degrades_without_embedder() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&dir).await);
    seed(&store).await;

    let engine = SearchEngine::new(
        Arc::clone(&store),
        Arc::new(DisabledEmbedder),
        schema_atlas::config::RetrievalConfig::default(),
    );

    // Disabled embedder: the vector branch degrades away, lexical ranking
    // still answers.
    let page = engine
        .search_metrics("revenue", Some("sales"), 1, 10, None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].slug, "total-revenue");
    assert_eq!(page.items[0].required_tables, vec!["orders".to_string()]);
}
