//! Core data models for the schema knowledge graph.
//!
//! The graph describes a database for an NL-to-SQL assistant: datasources
//! own tables, tables own columns, columns are linked by schema edges, and
//! a semantic layer (metrics, synonyms, context rules, categorical values,
//! golden example queries) hangs off the physical ontology.
//!
//! Every searchable kind binds an explicit `search_text()` function: the
//! concatenation of the fields that drive retrieval for that kind. The
//! engine never reflects over fields at runtime; adding a kind means adding
//! an [`EntityKind`] variant and its extraction function.

use serde::{Deserialize, Serialize};

/// SQL dialect of a datasource. Determines which engine the downstream
/// generator targets; the retrieval engine only carries it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineDialect {
    Postgres,
    Bigquery,
    Snowflake,
    Tsql,
    Mysql,
}

impl EngineDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Bigquery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Tsql => "tsql",
            Self::Mysql => "mysql",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postgres" => Some(Self::Postgres),
            "bigquery" => Some(Self::Bigquery),
            "snowflake" => Some(Self::Snowflake),
            "tsql" => Some(Self::Tsql),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }
}

/// Cardinality of a schema edge between two columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "ONE_TO_ONE",
            Self::OneToMany => "ONE_TO_MANY",
            Self::ManyToOne => "MANY_TO_ONE",
            Self::ManyToMany => "MANY_TO_MANY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONE_TO_ONE" => Some(Self::OneToOne),
            "ONE_TO_MANY" => Some(Self::OneToMany),
            "MANY_TO_ONE" => Some(Self::ManyToOne),
            "MANY_TO_MANY" => Some(Self::ManyToMany),
            _ => None,
        }
    }
}

/// Target of a synonym: a tagged (kind, id) pair rather than a stringly
/// reference, so resolution dispatches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SynonymTarget {
    Table(String),
    Column(String),
    Metric(String),
    Value(String),
}

impl SynonymTarget {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Table(_) => "TABLE",
            Self::Column(_) => "COLUMN",
            Self::Metric(_) => "METRIC",
            Self::Value(_) => "VALUE",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Table(id) | Self::Column(id) | Self::Metric(id) | Self::Value(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "TABLE" => Some(Self::Table(id)),
            "COLUMN" => Some(Self::Column(id)),
            "METRIC" => Some(Self::Metric(id)),
            "VALUE" => Some(Self::Value(id)),
            _ => None,
        }
    }
}

/// How a kind participates in hybrid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Vector + lexical branches fused with RRF.
    Hybrid,
    /// Lexical branch only; the kind carries no embedding.
    LexicalOnly,
}

/// Closed set of searchable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Datasource,
    Table,
    Column,
    Edge,
    Metric,
    Synonym,
    ContextRule,
    CategoricalValue,
    ExampleQuery,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Datasource,
        EntityKind::Table,
        EntityKind::Column,
        EntityKind::Edge,
        EntityKind::Metric,
        EntityKind::Synonym,
        EntityKind::ContextRule,
        EntityKind::CategoricalValue,
        EntityKind::ExampleQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datasource => "datasource",
            Self::Table => "table",
            Self::Column => "column",
            Self::Edge => "edge",
            Self::Metric => "metric",
            Self::Synonym => "synonym",
            Self::ContextRule => "context_rule",
            Self::CategoricalValue => "categorical_value",
            Self::ExampleQuery => "example_query",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "datasource" | "datasources" => Some(Self::Datasource),
            "table" | "tables" => Some(Self::Table),
            "column" | "columns" => Some(Self::Column),
            "edge" | "edges" => Some(Self::Edge),
            "metric" | "metrics" => Some(Self::Metric),
            "synonym" | "synonyms" => Some(Self::Synonym),
            "context_rule" | "context_rules" => Some(Self::ContextRule),
            "categorical_value" | "categorical_values" => Some(Self::CategoricalValue),
            "example_query" | "example_queries" => Some(Self::ExampleQuery),
            _ => None,
        }
    }

    /// Categorical values are matched on their short labels, where vector
    /// similarity adds noise rather than recall; everything else is hybrid.
    pub fn search_mode(&self) -> SearchMode {
        match self {
            Self::CategoricalValue => SearchMode::LexicalOnly,
            _ => SearchMode::Hybrid,
        }
    }

    /// Empty-query behavior differs by kind: example-query search returns
    /// an empty page on a blank prompt, every other kind degrades to an
    /// unranked scope-filtered listing.
    pub fn lists_on_empty_query(&self) -> bool {
        !matches!(self, Self::ExampleQuery)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root scope of the ontology: one physical database.
#[derive(Debug, Clone, Serialize)]
pub struct Datasource {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub engine: EngineDialect,
    /// Keywords, table names, and key metrics; feeds top-level search.
    pub context_signature: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Datasource {
    pub fn search_text(&self) -> String {
        join_parts(&[self.description.as_deref(), self.context_signature.as_deref()])
    }
}

/// A database table with both physical and semantic identities.
#[derive(Debug, Clone, Serialize)]
pub struct TableNode {
    pub id: String,
    pub datasource_id: String,
    /// Actual name in the database (e.g. `t_orders_v2`).
    pub physical_name: String,
    pub slug: String,
    /// Human-readable name (e.g. "Orders").
    pub semantic_name: String,
    pub description: Option<String>,
    /// Minimal CREATE TABLE statement handed to the downstream generator.
    pub ddl_context: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TableNode {
    pub fn search_text(&self) -> String {
        join_parts(&[Some(&self.semantic_name), self.description.as_deref()])
    }
}

/// A table column: the atomic attribute of the graph.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnNode {
    pub id: String,
    pub table_id: String,
    /// Physical column name (e.g. `usr_id`).
    pub name: String,
    pub slug: String,
    pub semantic_name: Option<String>,
    pub data_type: String,
    pub is_primary_key: bool,
    pub description: Option<String>,
    /// Interpretation notes (e.g. "NULL means the transaction failed").
    pub context_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ColumnNode {
    pub fn search_text(&self) -> String {
        join_parts(&[
            Some(self.semantic_name.as_deref().unwrap_or(&self.name)),
            self.description.as_deref(),
            self.context_note.as_deref(),
        ])
    }
}

/// Directed relationship between two columns. Defines how tables can be
/// legally joined; traversal treats it as direction-agnostic while the hop
/// keeps the original orientation and cardinality.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaEdge {
    pub id: String,
    pub source_column_id: String,
    pub target_column_id: String,
    pub relationship: RelationshipKind,
    /// False when a physical foreign key exists, true for curated links.
    pub is_inferred: bool,
    pub description: Option<String>,
    pub context_note: Option<String>,
    pub created_at: i64,
}

impl SchemaEdge {
    pub fn search_text(&self) -> String {
        join_parts(&[self.description.as_deref(), self.context_note.as_deref()])
    }
}

/// Authoritative business KPI definition.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub id: String,
    pub datasource_id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub calculation_sql: String,
    /// Table ids this metric needs; surfaced to callers as slugs.
    pub required_tables: Vec<String>,
    pub filter_condition: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Metric {
    pub fn search_text(&self) -> String {
        join_parts(&[Some(&self.name), self.description.as_deref()])
    }
}

/// Domain vocabulary entry mapping a human term to a graph entity.
#[derive(Debug, Clone, Serialize)]
pub struct Synonym {
    pub id: String,
    pub term: String,
    pub slug: String,
    pub target: SynonymTarget,
    pub created_at: i64,
}

impl Synonym {
    pub fn search_text(&self) -> String {
        self.term.trim().to_string()
    }
}

/// Free-text interpretation rule attached to a column.
#[derive(Debug, Clone, Serialize)]
pub struct ContextRule {
    pub id: String,
    pub column_id: String,
    pub slug: String,
    pub rule_text: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContextRule {
    pub fn search_text(&self) -> String {
        self.rule_text.trim().to_string()
    }
}

/// Stored-value-to-label mapping for a categorical column.
#[derive(Debug, Clone, Serialize)]
pub struct CategoricalValue {
    pub id: String,
    pub column_id: String,
    pub slug: String,
    /// The raw value as stored in the database.
    pub value_raw: String,
    /// Human label used for retrieval.
    pub value_label: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CategoricalValue {
    pub fn search_text(&self) -> String {
        self.value_label.trim().to_string()
    }
}

/// Verified natural-language / SQL pair ("golden SQL").
#[derive(Debug, Clone, Serialize)]
pub struct ExampleQuery {
    pub id: String,
    pub datasource_id: String,
    pub slug: String,
    pub prompt_text: String,
    pub sql_query: String,
    /// 1–5; used to pick examples of comparable difficulty.
    pub complexity_score: i32,
    pub verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ExampleQuery {
    pub fn search_text(&self) -> String {
        self.prompt_text.trim().to_string()
    }
}

fn join_parts(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|p| *p)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_search_text_skips_missing_description() {
        let table = TableNode {
            id: "t1".into(),
            datasource_id: "d1".into(),
            physical_name: "t_orders".into(),
            slug: "orders".into(),
            semantic_name: "Orders".into(),
            description: None,
            ddl_context: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(table.search_text(), "Orders");
    }

    #[test]
    fn test_column_search_text_falls_back_to_physical_name() {
        let col = ColumnNode {
            id: "c1".into(),
            table_id: "t1".into(),
            name: "usr_id".into(),
            slug: "usr-id".into(),
            semantic_name: None,
            data_type: "INT".into(),
            is_primary_key: false,
            description: Some("User reference".into()),
            context_note: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(col.search_text(), "usr_id User reference");
    }

    #[test]
    fn test_entity_kind_parse_accepts_plurals() {
        assert_eq!(EntityKind::parse("tables"), Some(EntityKind::Table));
        assert_eq!(
            EntityKind::parse("example_queries"),
            Some(EntityKind::ExampleQuery)
        );
        assert_eq!(EntityKind::parse("bogus"), None);
    }

    #[test]
    fn test_empty_query_policy_per_kind() {
        assert!(EntityKind::Table.lists_on_empty_query());
        assert!(!EntityKind::ExampleQuery.lists_on_empty_query());
    }

    #[test]
    fn test_value_kind_is_lexical_only() {
        assert_eq!(
            EntityKind::CategoricalValue.search_mode(),
            SearchMode::LexicalOnly
        );
        assert_eq!(EntityKind::Table.search_mode(), SearchMode::Hybrid);
    }

    #[test]
    fn test_synonym_target_round_trip() {
        let t = SynonymTarget::Column("c9".into());
        assert_eq!(t.kind_str(), "COLUMN");
        assert_eq!(
            SynonymTarget::from_parts("COLUMN", "c9".into()),
            Some(SynonymTarget::Column("c9".into()))
        );
    }
}
