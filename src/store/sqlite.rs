//! SQLite-backed [`Store`] implementation.
//!
//! Lexical search runs against one FTS5 virtual table per entity kind
//! (`fts_*`, see [`crate::migrate`]); vector search scans the kind's BLOB
//! embeddings and ranks by cosine similarity in Rust. Scope filters are
//! applied by joining up the ownership chain (value → column → table →
//! datasource) inside the query, never by post-filtering in the engine.
//!
//! Entity upserts are inherent methods (the management layer's seam, also
//! used by tests and seed tooling); the [`Store`] trait itself stays
//! read-only apart from the embedding+fingerprint pair.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::cache::fingerprint;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{AtlasError, Result};
use crate::models::{
    CategoricalValue, ColumnNode, ContextRule, Datasource, EngineDialect, EntityKind,
    ExampleQuery, Metric, RelationshipKind, SchemaEdge, Synonym, SynonymTarget, TableNode,
};

use super::{EdgeEnds, Scope, SearchableRecord, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============ Per-kind SQL fragments ============

struct KindSql {
    base: &'static str,
    fts: &'static str,
    /// JOIN clauses hanging off the base table aliased `x`.
    join: &'static str,
    /// Scope predicate using two binds per dimension: `(? IS NULL OR ...)`.
    scope_where: &'static str,
    uses_datasource: bool,
    uses_table: bool,
    uses_column: bool,
}

fn kind_sql(kind: EntityKind) -> KindSql {
    match kind {
        EntityKind::Datasource => KindSql {
            base: "datasources",
            fts: "fts_datasources",
            join: "",
            scope_where: "1=1",
            uses_datasource: false,
            uses_table: false,
            uses_column: false,
        },
        EntityKind::Table => KindSql {
            base: "tables",
            fts: "fts_tables",
            join: "",
            scope_where: "(? IS NULL OR x.datasource_id = ?)",
            uses_datasource: true,
            uses_table: false,
            uses_column: false,
        },
        EntityKind::Column => KindSql {
            base: "columns",
            fts: "fts_columns",
            join: "JOIN tables t ON t.id = x.table_id",
            scope_where: "(? IS NULL OR t.datasource_id = ?) AND (? IS NULL OR x.table_id = ?)",
            uses_datasource: true,
            uses_table: true,
            uses_column: false,
        },
        EntityKind::Edge => KindSql {
            base: "schema_edges",
            fts: "fts_edges",
            join: "JOIN columns sc ON sc.id = x.source_column_id \
                   JOIN tables st ON st.id = sc.table_id \
                   JOIN columns tc ON tc.id = x.target_column_id \
                   JOIN tables tt ON tt.id = tc.table_id",
            scope_where:
                "(? IS NULL OR st.datasource_id = ?) AND (? IS NULL OR ? IN (st.id, tt.id))",
            uses_datasource: true,
            uses_table: true,
            uses_column: false,
        },
        EntityKind::Metric => KindSql {
            base: "metrics",
            fts: "fts_metrics",
            join: "",
            scope_where: "(? IS NULL OR x.datasource_id = ?)",
            uses_datasource: true,
            uses_table: false,
            uses_column: false,
        },
        EntityKind::Synonym => KindSql {
            base: "synonyms",
            fts: "fts_synonyms",
            join: "",
            scope_where: "1=1",
            uses_datasource: false,
            uses_table: false,
            uses_column: false,
        },
        EntityKind::ContextRule => KindSql {
            base: "context_rules",
            fts: "fts_context_rules",
            join: "JOIN columns c ON c.id = x.column_id JOIN tables t ON t.id = c.table_id",
            scope_where: "(? IS NULL OR t.datasource_id = ?) AND (? IS NULL OR c.table_id = ?) \
                          AND (? IS NULL OR x.column_id = ?)",
            uses_datasource: true,
            uses_table: true,
            uses_column: true,
        },
        EntityKind::CategoricalValue => KindSql {
            base: "categorical_values",
            fts: "fts_categorical_values",
            join: "JOIN columns c ON c.id = x.column_id JOIN tables t ON t.id = c.table_id",
            scope_where: "(? IS NULL OR t.datasource_id = ?) AND (? IS NULL OR c.table_id = ?) \
                          AND (? IS NULL OR x.column_id = ?)",
            uses_datasource: true,
            uses_table: true,
            uses_column: true,
        },
        EntityKind::ExampleQuery => KindSql {
            base: "example_queries",
            fts: "fts_example_queries",
            join: "",
            scope_where: "(? IS NULL OR x.datasource_id = ?)",
            uses_datasource: true,
            uses_table: false,
            uses_column: false,
        },
    }
}

fn bind_scope<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    sql: &KindSql,
    scope: &'q Scope,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if sql.uses_datasource {
        q = q.bind(scope.datasource_id.as_deref());
        q = q.bind(scope.datasource_id.as_deref());
    }
    if sql.uses_table {
        q = q.bind(scope.table_id.as_deref());
        q = q.bind(scope.table_id.as_deref());
    }
    if sql.uses_column {
        q = q.bind(scope.column_id.as_deref());
        q = q.bind(scope.column_id.as_deref());
    }
    q
}

/// Turn free text into an FTS5 MATCH expression: each token quoted (so
/// user input can never produce a syntax error) and OR-joined.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn in_placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

fn decode_err(msg: String) -> AtlasError {
    AtlasError::Store(sqlx::Error::Decode(msg.into()))
}

// ============ Row mappers ============

fn row_to_datasource(row: &SqliteRow) -> Result<Datasource> {
    let engine_raw: String = row.get("engine");
    let engine = EngineDialect::parse(&engine_raw)
        .ok_or_else(|| decode_err(format!("unknown engine dialect: {}", engine_raw)))?;
    Ok(Datasource {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        engine,
        context_signature: row.get("context_signature"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_table(row: &SqliteRow) -> TableNode {
    TableNode {
        id: row.get("id"),
        datasource_id: row.get("datasource_id"),
        physical_name: row.get("physical_name"),
        slug: row.get("slug"),
        semantic_name: row.get("semantic_name"),
        description: row.get("description"),
        ddl_context: row.get("ddl_context"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_column(row: &SqliteRow) -> ColumnNode {
    ColumnNode {
        id: row.get("id"),
        table_id: row.get("table_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        semantic_name: row.get("semantic_name"),
        data_type: row.get("data_type"),
        is_primary_key: row.get("is_primary_key"),
        description: row.get("description"),
        context_note: row.get("context_note"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_edge(row: &SqliteRow) -> Result<SchemaEdge> {
    let rel_raw: String = row.get("relationship");
    let relationship = RelationshipKind::parse(&rel_raw)
        .ok_or_else(|| decode_err(format!("unknown relationship kind: {}", rel_raw)))?;
    Ok(SchemaEdge {
        id: row.get("id"),
        source_column_id: row.get("source_column_id"),
        target_column_id: row.get("target_column_id"),
        relationship,
        is_inferred: row.get("is_inferred"),
        description: row.get("description"),
        context_note: row.get("context_note"),
        created_at: row.get("created_at"),
    })
}

fn row_to_metric(row: &SqliteRow) -> Result<Metric> {
    let required_raw: String = row.get("required_tables");
    let required_tables: Vec<String> = serde_json::from_str(&required_raw)
        .map_err(|e| decode_err(format!("bad required_tables json: {}", e)))?;
    Ok(Metric {
        id: row.get("id"),
        datasource_id: row.get("datasource_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        calculation_sql: row.get("calculation_sql"),
        required_tables,
        filter_condition: row.get("filter_condition"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_synonym(row: &SqliteRow) -> Result<Synonym> {
    let kind_raw: String = row.get("target_kind");
    let target_id: String = row.get("target_id");
    let target = SynonymTarget::from_parts(&kind_raw, target_id)
        .ok_or_else(|| decode_err(format!("unknown synonym target kind: {}", kind_raw)))?;
    Ok(Synonym {
        id: row.get("id"),
        term: row.get("term"),
        slug: row.get("slug"),
        target,
        created_at: row.get("created_at"),
    })
}

fn row_to_rule(row: &SqliteRow) -> ContextRule {
    ContextRule {
        id: row.get("id"),
        column_id: row.get("column_id"),
        slug: row.get("slug"),
        rule_text: row.get("rule_text"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_value(row: &SqliteRow) -> CategoricalValue {
    CategoricalValue {
        id: row.get("id"),
        column_id: row.get("column_id"),
        slug: row.get("slug"),
        value_raw: row.get("value_raw"),
        value_label: row.get("value_label"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_example(row: &SqliteRow) -> ExampleQuery {
    ExampleQuery {
        id: row.get("id"),
        datasource_id: row.get("datasource_id"),
        slug: row.get("slug"),
        prompt_text: row.get("prompt_text"),
        sql_query: row.get("sql_query"),
        complexity_score: row.get("complexity_score"),
        verified: row.get("verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============ Store impl ============

#[async_trait]
impl Store for SqliteStore {
    async fn datasource_id_by_slug(&self, slug: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar("SELECT id FROM datasources WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn table_by_anchor(
        &self,
        datasource_id: Option<&str>,
        anchor: &str,
    ) -> Result<Option<TableNode>> {
        let row = sqlx::query(
            "SELECT * FROM tables \
             WHERE (slug = ? OR physical_name = ?) AND (? IS NULL OR datasource_id = ?) \
             LIMIT 1",
        )
        .bind(anchor)
        .bind(anchor)
        .bind(datasource_id)
        .bind(datasource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_table))
    }

    async fn table_id_by_slug(
        &self,
        datasource_id: Option<&str>,
        slug: &str,
    ) -> Result<Option<String>> {
        let id = sqlx::query_scalar(
            "SELECT id FROM tables WHERE slug = ? AND (? IS NULL OR datasource_id = ?)",
        )
        .bind(slug)
        .bind(datasource_id)
        .bind(datasource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn column_id_by_slug(&self, table_id: &str, slug: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar("SELECT id FROM columns WHERE table_id = ? AND slug = ?")
            .bind(table_id)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn lexical_search(
        &self,
        kind: EntityKind,
        query: &str,
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>> {
        let expr = match fts_match_expr(query) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let sql = kind_sql(kind);

        let stmt = format!(
            "SELECT m.entity_id FROM \
             (SELECT entity_id, rank FROM {fts} WHERE {fts} MATCH ?) m \
             JOIN {base} x ON x.id = m.entity_id \
             {join} \
             WHERE {scope} \
             ORDER BY m.rank, m.entity_id \
             LIMIT ?",
            fts = sql.fts,
            base = sql.base,
            join = sql.join,
            scope = sql.scope_where,
        );

        let mut q = sqlx::query(&stmt).bind(&expr);
        q = bind_scope(q, &sql, scope);
        q = q.bind(k);

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get("entity_id")).collect())
    }

    async fn vector_search(
        &self,
        kind: EntityKind,
        query_vec: &[f32],
        scope: &Scope,
        k: i64,
    ) -> Result<Vec<String>> {
        if kind == EntityKind::CategoricalValue {
            return Ok(Vec::new());
        }
        let sql = kind_sql(kind);

        let stmt = format!(
            "SELECT x.id, x.embedding FROM {base} x {join} \
             WHERE x.embedding IS NOT NULL AND {scope}",
            base = sql.base,
            join = sql.join,
            scope = sql.scope_where,
        );

        let mut q = sqlx::query(&stmt);
        q = bind_scope(q, &sql, scope);
        let rows = q.fetch_all(&self.pool).await?;

        let mut scored: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let sim = cosine_similarity(query_vec, &vec) as f64;
                (row.get("id"), sim)
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
        let sql = kind_sql(kind);
        let stmt = format!(
            "SELECT x.id FROM {base} x {join} WHERE {scope} \
             ORDER BY x.created_at, x.id LIMIT ? OFFSET ?",
            base = sql.base,
            join = sql.join,
            scope = sql.scope_where,
        );

        let mut q = sqlx::query(&stmt);
        q = bind_scope(q, &sql, scope);
        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn count_ids(&self, kind: EntityKind, scope: &Scope) -> Result<i64> {
        let sql = kind_sql(kind);
        let stmt = format!(
            "SELECT COUNT(*) FROM {base} x {join} WHERE {scope}",
            base = sql.base,
            join = sql.join,
            scope = sql.scope_where,
        );

        let mut q = sqlx::query_scalar(&stmt);
        if sql.uses_datasource {
            q = q.bind(scope.datasource_id.as_deref());
            q = q.bind(scope.datasource_id.as_deref());
        }
        if sql.uses_table {
            q = q.bind(scope.table_id.as_deref());
            q = q.bind(scope.table_id.as_deref());
        }
        if sql.uses_column {
            q = q.bind(scope.column_id.as_deref());
            q = q.bind(scope.column_id.as_deref());
        }

        Ok(q.fetch_one(&self.pool).await?)
    }

    async fn datasources_by_ids(&self, ids: &[String]) -> Result<Vec<Datasource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM datasources WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_datasource).collect()
    }

    async fn tables_by_ids(&self, ids: &[String]) -> Result<Vec<TableNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM tables WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_table).collect())
    }

    async fn columns_by_ids(&self, ids: &[String]) -> Result<Vec<ColumnNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM columns WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_column).collect())
    }

    async fn edges_by_ids(&self, ids: &[String]) -> Result<Vec<SchemaEdge>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM schema_edges WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_edge).collect()
    }

    async fn metrics_by_ids(&self, ids: &[String]) -> Result<Vec<Metric>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM metrics WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn synonyms_by_ids(&self, ids: &[String]) -> Result<Vec<Synonym>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM synonyms WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_synonym).collect()
    }

    async fn rules_by_ids(&self, ids: &[String]) -> Result<Vec<ContextRule>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM context_rules WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_rule).collect())
    }

    async fn values_by_ids(&self, ids: &[String]) -> Result<Vec<CategoricalValue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM categorical_values WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_value).collect())
    }

    async fn examples_by_ids(&self, ids: &[String]) -> Result<Vec<ExampleQuery>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = format!(
            "SELECT * FROM example_queries WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut q = sqlx::query(&stmt);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_example).collect())
    }

    async fn edge_endpoints(&self, datasource_id: Option<&str>) -> Result<Vec<EdgeEnds>> {
        let rows = sqlx::query(
            "SELECT e.*, sc.table_id AS source_table_id, tc.table_id AS target_table_id \
             FROM schema_edges e \
             JOIN columns sc ON sc.id = e.source_column_id \
             JOIN columns tc ON tc.id = e.target_column_id \
             JOIN tables st ON st.id = sc.table_id \
             WHERE (? IS NULL OR st.datasource_id = ?)",
        )
        .bind(datasource_id)
        .bind(datasource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(EdgeEnds {
                    edge: row_to_edge(row)?,
                    source_table_id: row.get("source_table_id"),
                    target_table_id: row.get("target_table_id"),
                })
            })
            .collect()
    }

    async fn searchable(&self, kind: EntityKind, id: &str) -> Result<Option<SearchableRecord>> {
        if kind == EntityKind::CategoricalValue {
            return Ok(None);
        }
        let sql = kind_sql(kind);
        let stmt = format!("SELECT * FROM {} WHERE id = ?", sql.base);
        let row = sqlx::query(&stmt).bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(searchable_from_row(kind, &row)?)),
            None => Ok(None),
        }
    }

    async fn pending_searchables(
        &self,
        kind: EntityKind,
        limit: Option<i64>,
    ) -> Result<Vec<SearchableRecord>> {
        if kind == EntityKind::CategoricalValue {
            return Ok(Vec::new());
        }
        let sql = kind_sql(kind);
        let stmt = format!("SELECT * FROM {} ORDER BY created_at, id", sql.base);
        let rows = sqlx::query(&stmt).fetch_all(&self.pool).await?;

        let mut out = Vec::new();
        for row in &rows {
            let rec = searchable_from_row(kind, row)?;
            let current = fingerprint(&rec.search_text);
            let fresh = rec.fingerprint.as_deref() == Some(current.as_str())
                && rec.embedding.is_some();
            if !fresh {
                out.push(rec);
            }
            if let Some(l) = limit {
                if out.len() as i64 >= l {
                    break;
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
        let sql = kind_sql(kind);
        let stmt = format!(
            "UPDATE {} SET embedding = ?, fingerprint = ? WHERE id = ?",
            sql.base
        );
        let result = sqlx::query(&stmt)
            .bind(vec_to_blob(vector))
            .bind(fingerprint)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AtlasError::not_found(format!("{} {}", kind, id)));
        }
        Ok(())
    }

    async fn clear_embeddings(&self, kind: EntityKind) -> Result<()> {
        if kind == EntityKind::CategoricalValue {
            return Ok(());
        }
        let sql = kind_sql(kind);
        let stmt = format!(
            "UPDATE {} SET embedding = NULL, fingerprint = NULL",
            sql.base
        );
        sqlx::query(&stmt).execute(&self.pool).await?;
        Ok(())
    }
}

fn searchable_from_row(kind: EntityKind, row: &SqliteRow) -> Result<SearchableRecord> {
    let search_text = match kind {
        EntityKind::Datasource => row_to_datasource(row)?.search_text(),
        EntityKind::Table => row_to_table(row).search_text(),
        EntityKind::Column => row_to_column(row).search_text(),
        EntityKind::Edge => row_to_edge(row)?.search_text(),
        EntityKind::Metric => row_to_metric(row)?.search_text(),
        EntityKind::Synonym => row_to_synonym(row)?.search_text(),
        EntityKind::ContextRule => row_to_rule(row).search_text(),
        EntityKind::ExampleQuery => row_to_example(row).search_text(),
        EntityKind::CategoricalValue => String::new(),
    };
    let blob: Option<Vec<u8>> = row.get("embedding");
    Ok(SearchableRecord {
        id: row.get("id"),
        search_text,
        fingerprint: row.get("fingerprint"),
        embedding: blob.as_deref().map(blob_to_vec),
    })
}

// ============ Upserts (management-layer seam) ============

impl SqliteStore {
    async fn refresh_fts(&self, fts: &str, id: &str, text: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE entity_id = ?", fts))
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "INSERT INTO {} (entity_id, text) VALUES (?, ?)",
            fts
        ))
        .bind(id)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a datasource. The embedding+fingerprint pair is
    /// preserved on update; staleness is detected by the cache from the
    /// fingerprint, not by the write itself.
    pub async fn upsert_datasource(&self, ds: &Datasource) -> Result<()> {
        sqlx::query(
            "INSERT INTO datasources \
             (id, name, slug, description, engine, context_signature, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                name = excluded.name, slug = excluded.slug, \
                description = excluded.description, engine = excluded.engine, \
                context_signature = excluded.context_signature, \
                updated_at = excluded.updated_at",
        )
        .bind(&ds.id)
        .bind(&ds.name)
        .bind(&ds.slug)
        .bind(&ds.description)
        .bind(ds.engine.as_str())
        .bind(&ds.context_signature)
        .bind(ds.created_at)
        .bind(ds.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_datasources", &ds.id, &ds.search_text())
            .await
    }

    pub async fn upsert_table(&self, table: &TableNode) -> Result<()> {
        sqlx::query(
            "INSERT INTO tables \
             (id, datasource_id, physical_name, slug, semantic_name, description, ddl_context, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                datasource_id = excluded.datasource_id, \
                physical_name = excluded.physical_name, slug = excluded.slug, \
                semantic_name = excluded.semantic_name, description = excluded.description, \
                ddl_context = excluded.ddl_context, updated_at = excluded.updated_at",
        )
        .bind(&table.id)
        .bind(&table.datasource_id)
        .bind(&table.physical_name)
        .bind(&table.slug)
        .bind(&table.semantic_name)
        .bind(&table.description)
        .bind(&table.ddl_context)
        .bind(table.created_at)
        .bind(table.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_tables", &table.id, &table.search_text())
            .await
    }

    pub async fn upsert_column(&self, col: &ColumnNode) -> Result<()> {
        sqlx::query(
            "INSERT INTO columns \
             (id, table_id, name, slug, semantic_name, data_type, is_primary_key, description, \
              context_note, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                table_id = excluded.table_id, name = excluded.name, slug = excluded.slug, \
                semantic_name = excluded.semantic_name, data_type = excluded.data_type, \
                is_primary_key = excluded.is_primary_key, description = excluded.description, \
                context_note = excluded.context_note, updated_at = excluded.updated_at",
        )
        .bind(&col.id)
        .bind(&col.table_id)
        .bind(&col.name)
        .bind(&col.slug)
        .bind(&col.semantic_name)
        .bind(&col.data_type)
        .bind(col.is_primary_key)
        .bind(&col.description)
        .bind(&col.context_note)
        .bind(col.created_at)
        .bind(col.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_columns", &col.id, &col.search_text())
            .await
    }

    pub async fn upsert_edge(&self, edge: &SchemaEdge) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_edges \
             (id, source_column_id, target_column_id, relationship, is_inferred, description, \
              context_note, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                source_column_id = excluded.source_column_id, \
                target_column_id = excluded.target_column_id, \
                relationship = excluded.relationship, is_inferred = excluded.is_inferred, \
                description = excluded.description, context_note = excluded.context_note",
        )
        .bind(&edge.id)
        .bind(&edge.source_column_id)
        .bind(&edge.target_column_id)
        .bind(edge.relationship.as_str())
        .bind(edge.is_inferred)
        .bind(&edge.description)
        .bind(&edge.context_note)
        .bind(edge.created_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_edges", &edge.id, &edge.search_text())
            .await
    }

    pub async fn upsert_metric(&self, metric: &Metric) -> Result<()> {
        let required = serde_json::to_string(&metric.required_tables)
            .map_err(|e| decode_err(format!("bad required_tables: {}", e)))?;
        sqlx::query(
            "INSERT INTO metrics \
             (id, datasource_id, name, slug, description, calculation_sql, required_tables, \
              filter_condition, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                datasource_id = excluded.datasource_id, name = excluded.name, \
                slug = excluded.slug, description = excluded.description, \
                calculation_sql = excluded.calculation_sql, \
                required_tables = excluded.required_tables, \
                filter_condition = excluded.filter_condition, updated_at = excluded.updated_at",
        )
        .bind(&metric.id)
        .bind(&metric.datasource_id)
        .bind(&metric.name)
        .bind(&metric.slug)
        .bind(&metric.description)
        .bind(&metric.calculation_sql)
        .bind(required)
        .bind(&metric.filter_condition)
        .bind(metric.created_at)
        .bind(metric.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_metrics", &metric.id, &metric.search_text())
            .await
    }

    pub async fn upsert_synonym(&self, syn: &Synonym) -> Result<()> {
        sqlx::query(
            "INSERT INTO synonyms (id, term, slug, target_kind, target_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                term = excluded.term, slug = excluded.slug, \
                target_kind = excluded.target_kind, target_id = excluded.target_id",
        )
        .bind(&syn.id)
        .bind(&syn.term)
        .bind(&syn.slug)
        .bind(syn.target.kind_str())
        .bind(syn.target.id())
        .bind(syn.created_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_synonyms", &syn.id, &syn.search_text())
            .await
    }

    pub async fn upsert_rule(&self, rule: &ContextRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO context_rules (id, column_id, slug, rule_text, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                column_id = excluded.column_id, slug = excluded.slug, \
                rule_text = excluded.rule_text, updated_at = excluded.updated_at",
        )
        .bind(&rule.id)
        .bind(&rule.column_id)
        .bind(&rule.slug)
        .bind(&rule.rule_text)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_context_rules", &rule.id, &rule.search_text())
            .await
    }

    pub async fn upsert_value(&self, value: &CategoricalValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO categorical_values \
             (id, column_id, slug, value_raw, value_label, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                column_id = excluded.column_id, slug = excluded.slug, \
                value_raw = excluded.value_raw, value_label = excluded.value_label, \
                updated_at = excluded.updated_at",
        )
        .bind(&value.id)
        .bind(&value.column_id)
        .bind(&value.slug)
        .bind(&value.value_raw)
        .bind(&value.value_label)
        .bind(value.created_at)
        .bind(value.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_categorical_values", &value.id, &value.search_text())
            .await
    }

    pub async fn upsert_example(&self, ex: &ExampleQuery) -> Result<()> {
        sqlx::query(
            "INSERT INTO example_queries \
             (id, datasource_id, slug, prompt_text, sql_query, complexity_score, verified, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                datasource_id = excluded.datasource_id, slug = excluded.slug, \
                prompt_text = excluded.prompt_text, sql_query = excluded.sql_query, \
                complexity_score = excluded.complexity_score, verified = excluded.verified, \
                updated_at = excluded.updated_at",
        )
        .bind(&ex.id)
        .bind(&ex.datasource_id)
        .bind(&ex.slug)
        .bind(&ex.prompt_text)
        .bind(&ex.sql_query)
        .bind(ex.complexity_score)
        .bind(ex.verified)
        .bind(ex.created_at)
        .bind(ex.updated_at)
        .execute(&self.pool)
        .await?;
        self.refresh_fts("fts_example_queries", &ex.id, &ex.search_text())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_match_expr_quotes_tokens() {
        assert_eq!(
            fts_match_expr("orders revenue").as_deref(),
            Some("\"orders\" OR \"revenue\"")
        );
        assert_eq!(fts_match_expr("   ").as_deref(), None);
    }

    #[test]
    fn test_fts_match_expr_escapes_quotes() {
        assert_eq!(
            fts_match_expr("say \"hi\"").as_deref(),
            Some("\"say\" OR \"\"\"hi\"\"\"")
        );
    }

    #[test]
    fn test_in_placeholders() {
        assert_eq!(in_placeholders(3), "?,?,?");
    }
}
