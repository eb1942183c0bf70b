//! Demo dataset seeding.
//!
//! Writes a small e-commerce schema graph so search, path finding, and
//! context resolution can be exercised right after `atlas init`. The
//! entities go through the same upsert seam the management layer uses,
//! so FTS rows are indexed as part of the write.

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EngineDialect, ExampleQuery, Metric,
    RelationshipKind, SchemaEdge, Synonym, SynonymTarget, TableNode,
};
use crate::store::sqlite::SqliteStore;

fn id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn run_seed(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let now = Utc::now().timestamp();

    let ds_id = id();
    store
        .upsert_datasource(&Datasource {
            id: ds_id.clone(),
            name: "Sales DWH Demo".into(),
            slug: "sales-demo".into(),
            description: Some("Demo e-commerce data warehouse".into()),
            engine: EngineDialect::Postgres,
            context_signature: Some("orders customers products revenue".into()),
            created_at: now,
            updated_at: now,
        })
        .await?;

    let orders_id = id();
    store
        .upsert_table(&TableNode {
            id: orders_id.clone(),
            datasource_id: ds_id.clone(),
            physical_name: "t_orders".into(),
            slug: "orders".into(),
            semantic_name: "Orders".into(),
            description: Some("One row per customer order".into()),
            ddl_context: Some(
                "CREATE TABLE t_orders (id INT, customer_id INT, status VARCHAR(16), \
                 amount_total DECIMAL(10,2))"
                    .into(),
            ),
            created_at: now,
            updated_at: now,
        })
        .await?;

    let customers_id = id();
    store
        .upsert_table(&TableNode {
            id: customers_id.clone(),
            datasource_id: ds_id.clone(),
            physical_name: "t_customers".into(),
            slug: "customers".into(),
            semantic_name: "Customers".into(),
            description: Some("Customer master data".into()),
            ddl_context: Some("CREATE TABLE t_customers (id INT, name VARCHAR(255))".into()),
            created_at: now,
            updated_at: now,
        })
        .await?;

    let order_customer_id = id();
    store
        .upsert_column(&ColumnNode {
            id: order_customer_id.clone(),
            table_id: orders_id.clone(),
            name: "customer_id".into(),
            slug: "customer-id".into(),
            semantic_name: Some("Customer ID".into()),
            data_type: "INT".into(),
            is_primary_key: false,
            description: Some("Customer who placed the order".into()),
            context_note: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let order_status_id = id();
    store
        .upsert_column(&ColumnNode {
            id: order_status_id.clone(),
            table_id: orders_id.clone(),
            name: "status".into(),
            slug: "status".into(),
            semantic_name: Some("Order Status".into()),
            data_type: "VARCHAR(16)".into(),
            is_primary_key: false,
            description: Some("Lifecycle status of the order".into()),
            context_note: Some("NULL means the order was never submitted".into()),
            created_at: now,
            updated_at: now,
        })
        .await?;

    let customer_pk_id = id();
    store
        .upsert_column(&ColumnNode {
            id: customer_pk_id.clone(),
            table_id: customers_id.clone(),
            name: "id".into(),
            slug: "id".into(),
            semantic_name: Some("Customer ID".into()),
            data_type: "INT".into(),
            is_primary_key: true,
            description: Some("Primary key".into()),
            context_note: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    store
        .upsert_edge(&SchemaEdge {
            id: id(),
            source_column_id: order_customer_id,
            target_column_id: customer_pk_id,
            relationship: RelationshipKind::ManyToOne,
            is_inferred: false,
            description: Some("Customer who placed the order".into()),
            context_note: None,
            created_at: now,
        })
        .await?;

    store
        .upsert_metric(&Metric {
            id: id(),
            datasource_id: ds_id.clone(),
            name: "Total Revenue".into(),
            slug: "total-revenue".into(),
            description: Some("Gross revenue across all completed orders".into()),
            calculation_sql: "SUM(amount_total)".into(),
            required_tables: vec![orders_id.clone()],
            filter_condition: Some("status = 'C'".into()),
            created_at: now,
            updated_at: now,
        })
        .await?;

    store
        .upsert_synonym(&Synonym {
            id: id(),
            term: "clients".into(),
            slug: "clients".into(),
            target: SynonymTarget::Table(customers_id),
            created_at: now,
        })
        .await?;

    store
        .upsert_rule(&ContextRule {
            id: id(),
            column_id: order_status_id.clone(),
            slug: "cancelled-status".into(),
            rule_text: "status = 'X' means the order was cancelled".into(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    store
        .upsert_value(&CategoricalValue {
            id: id(),
            column_id: order_status_id,
            slug: "status-completed".into(),
            value_raw: "C".into(),
            value_label: "Completed".into(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    store
        .upsert_example(&ExampleQuery {
            id: id(),
            datasource_id: ds_id,
            slug: "orders-last-month".into(),
            prompt_text: "How many orders were placed last month".into(),
            sql_query: "SELECT COUNT(*) FROM t_orders WHERE created_at >= date_trunc('month', \
                        now() - interval '1 month')"
                .into(),
            complexity_score: 2,
            verified: true,
            created_at: now,
            updated_at: now,
        })
        .await?;

    println!("Seeded demo datasource 'sales-demo'");
    println!("Try: atlas search table \"customer orders\" --datasource sales-demo");
    Ok(())
}
