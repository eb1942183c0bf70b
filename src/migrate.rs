use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// FTS5 virtual tables, one per searchable kind. Each row mirrors the
/// entity's derived search text and is rewritten on every upsert.
pub const FTS_TABLES: [&str; 9] = [
    "fts_datasources",
    "fts_tables",
    "fts_columns",
    "fts_edges",
    "fts_metrics",
    "fts_synonyms",
    "fts_context_rules",
    "fts_categorical_values",
    "fts_example_queries",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables, FTS indexes, and lookup indexes. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            description TEXT,
            engine TEXT NOT NULL,
            context_signature TEXT,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tables (
            id TEXT PRIMARY KEY,
            datasource_id TEXT NOT NULL,
            physical_name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            semantic_name TEXT NOT NULL,
            description TEXT,
            ddl_context TEXT,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(datasource_id, physical_name),
            FOREIGN KEY (datasource_id) REFERENCES datasources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS columns (
            id TEXT PRIMARY KEY,
            table_id TEXT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            semantic_name TEXT,
            data_type TEXT NOT NULL,
            is_primary_key INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            context_note TEXT,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(table_id, slug),
            FOREIGN KEY (table_id) REFERENCES tables(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_edges (
            id TEXT PRIMARY KEY,
            source_column_id TEXT NOT NULL,
            target_column_id TEXT NOT NULL,
            relationship TEXT NOT NULL,
            is_inferred INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            context_note TEXT,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (source_column_id) REFERENCES columns(id),
            FOREIGN KEY (target_column_id) REFERENCES columns(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            id TEXT PRIMARY KEY,
            datasource_id TEXT NOT NULL,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            description TEXT,
            calculation_sql TEXT NOT NULL,
            required_tables TEXT NOT NULL DEFAULT '[]',
            filter_condition TEXT,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (datasource_id) REFERENCES datasources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS synonyms (
            id TEXT PRIMARY KEY,
            term TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            target_kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS context_rules (
            id TEXT PRIMARY KEY,
            column_id TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            rule_text TEXT NOT NULL,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (column_id) REFERENCES columns(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lexical-only kind: no embedding columns.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categorical_values (
            id TEXT PRIMARY KEY,
            column_id TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            value_raw TEXT NOT NULL,
            value_label TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (column_id) REFERENCES columns(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS example_queries (
            id TEXT PRIMARY KEY,
            datasource_id TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            prompt_text TEXT NOT NULL,
            sql_query TEXT NOT NULL,
            complexity_score INTEGER NOT NULL DEFAULT 1,
            verified INTEGER NOT NULL DEFAULT 1,
            embedding BLOB,
            fingerprint TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (datasource_id) REFERENCES datasources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check sqlite_master first
    for name in FTS_TABLES {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await?;

        if !exists {
            sqlx::query(&format!(
                "CREATE VIRTUAL TABLE {} USING fts5(entity_id UNINDEXED, text)",
                name
            ))
            .execute(pool)
            .await?;
        }
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tables_datasource ON tables(datasource_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_columns_table ON columns(table_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_source ON schema_edges(source_column_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_target ON schema_edges(target_column_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_datasource ON metrics(datasource_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_examples_datasource ON example_queries(datasource_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_column ON context_rules(column_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_values_column ON categorical_values(column_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_synonyms_target ON synonyms(target_kind, target_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
