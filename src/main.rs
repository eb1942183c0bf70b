//! # Schema Atlas CLI (`atlas`)
//!
//! The `atlas` binary is the operational interface for the retrieval
//! engine: database initialization, hybrid search, join-path discovery,
//! context resolution, embedding maintenance, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and run schema migrations |
//! | `atlas search <kind> "<query>"` | Hybrid search over one entity kind |
//! | `atlas paths <source> <target>` | Enumerate join paths between tables |
//! | `atlas resolve <items>` | Resolve a context graph from JSON items |
//! | `atlas embed pending` | Backfill missing or stale embeddings |
//! | `atlas embed rebuild` | Delete and regenerate all embeddings |
//! | `atlas serve` | Start the JSON HTTP server |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use schema_atlas::config::{load_config, Config};
use schema_atlas::db;
use schema_atlas::embed_cmd;
use schema_atlas::embedding;
use schema_atlas::graph::{find_paths, PathRequest};
use schema_atlas::logging;
use schema_atlas::migrate;
use schema_atlas::models::EntityKind;
use schema_atlas::resolve::{ContextItem, ContextResolver};
use schema_atlas::search::SearchEngine;
use schema_atlas::seed;
use schema_atlas::server;
use schema_atlas::store::sqlite::SqliteStore;

/// Schema Atlas — hybrid retrieval and schema-graph resolution for
/// NL-to-SQL assistants.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Schema Atlas — hybrid retrieval and schema-graph resolution engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Write a small demo schema graph for experimentation.
    Seed,

    /// Search one entity kind with hybrid (vector + lexical) ranking.
    Search {
        /// Entity kind: datasource, table, column, edge, metric, synonym,
        /// context_rule, categorical_value, example_query.
        kind: String,

        /// Free-text query. An empty query lists scope-filtered entities
        /// (except example queries, which return nothing).
        query: String,

        /// Restrict to a datasource slug.
        #[arg(long)]
        datasource: Option<String>,

        /// Restrict to a table slug.
        #[arg(long)]
        table: Option<String>,

        /// Restrict to a column slug (requires --table).
        #[arg(long)]
        column: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long)]
        limit: Option<i64>,

        /// Drop results scoring below this fraction of the best score.
        #[arg(long)]
        min_ratio: Option<f64>,
    },

    /// Enumerate join paths between two tables (slug or physical name).
    Paths {
        source: String,
        target: String,

        /// Restrict traversal to a datasource slug.
        #[arg(long)]
        datasource: Option<String>,

        /// Maximum number of hops.
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Resolve a merged context graph from a JSON item list.
    ///
    /// Items: `[{"kind": "table", "search_text": "orders"}, ...]`,
    /// inline or `@file.json`.
    Resolve { items: String },

    /// Manage entity embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Start the JSON HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed entities with missing or stale embeddings.
    Pending {
        /// Maximum entities to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the configured embedding batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without calling the embedding provider.
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all embeddings and regenerate from scratch.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Initialized database at {}", config.db.path.display());
        }
        Commands::Seed => {
            seed::run_seed(&config).await?;
        }
        Commands::Search {
            kind,
            query,
            datasource,
            table,
            column,
            page,
            limit,
            min_ratio,
        } => {
            run_search(
                &config, &kind, &query, datasource, table, column, page, limit, min_ratio,
            )
            .await?;
        }
        Commands::Paths {
            source,
            target,
            datasource,
            max_depth,
        } => {
            run_paths(&config, source, target, datasource, max_depth).await?;
        }
        Commands::Resolve { items } => {
            run_resolve(&config, &items).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&config, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&config, batch_size).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

async fn build_engine(config: &Config) -> Result<(Arc<SqliteStore>, Arc<SearchEngine<SqliteStore>>)> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let embedder = embedding::create_embedder(&config.embedding)?;
    let engine = Arc::new(SearchEngine::new(
        Arc::clone(&store),
        embedder,
        config.retrieval.clone(),
    ));
    Ok((store, engine))
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    config: &Config,
    kind: &str,
    query: &str,
    datasource: Option<String>,
    table: Option<String>,
    column: Option<String>,
    page: i64,
    limit: Option<i64>,
    min_ratio: Option<f64>,
) -> Result<()> {
    let Some(kind) = EntityKind::parse(kind) else {
        bail!(
            "Unknown entity kind: {}. Use one of: datasource, table, column, edge, metric, \
             synonym, context_rule, categorical_value, example_query.",
            kind
        );
    };

    let (_, engine) = build_engine(config).await?;
    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let ds = datasource.as_deref();
    let tbl = table.as_deref();
    let col = column.as_deref();

    let (lines, total) = match kind {
        EntityKind::Datasource => {
            let p = engine.search_datasources(query, page, limit, min_ratio).await?;
            (
                p.items
                    .iter()
                    .map(|h| format!("[{:.4}] {} — {} ({})", h.score, h.slug, h.name, h.engine))
                    .collect::<Vec<_>>(),
                p.total,
            )
        }
        EntityKind::Table => {
            let p = engine.search_tables(query, ds, page, limit, min_ratio).await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {} — {} ({})",
                            h.score, h.slug, h.semantic_name, h.physical_name
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::Column => {
            let p = engine
                .search_columns(query, ds, tbl, page, limit, min_ratio)
                .await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {}.{} — {}{}",
                            h.score,
                            h.table_slug,
                            h.slug,
                            h.data_type,
                            if h.is_primary_key { " PK" } else { "" }
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::Edge => {
            let p = engine
                .search_edges(query, ds, tbl, page, limit, min_ratio)
                .await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {} -> {} [{}]",
                            h.score,
                            h.source,
                            h.target,
                            h.relationship.as_str()
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::Metric => {
            let p = engine.search_metrics(query, ds, page, limit, min_ratio).await?;
            (
                p.items
                    .iter()
                    .map(|h| format!("[{:.4}] {} — {}", h.score, h.slug, h.name))
                    .collect(),
                p.total,
            )
        }
        EntityKind::Synonym => {
            let p = engine.search_synonyms(query, page, limit, min_ratio).await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] \"{}\" -> {} ({})",
                            h.score, h.term, h.maps_to_slug, h.target_kind
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::ContextRule => {
            let p = engine
                .search_rules(query, ds, tbl, page, limit, min_ratio)
                .await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {}.{}: {}",
                            h.score, h.table_slug, h.column_slug, h.rule_text
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::CategoricalValue => {
            let p = engine
                .search_values(query, ds, tbl, col, page, limit, min_ratio)
                .await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {}.{} = '{}' ({})",
                            h.score, h.table_slug, h.column_slug, h.value_raw, h.value_label
                        )
                    })
                    .collect(),
                p.total,
            )
        }
        EntityKind::ExampleQuery => {
            let p = engine
                .search_examples(query, ds, page, limit, min_ratio)
                .await?;
            (
                p.items
                    .iter()
                    .map(|h| {
                        format!(
                            "[{:.4}] {} (complexity {}{})",
                            h.score,
                            h.prompt,
                            h.complexity,
                            if h.verified { ", verified" } else { "" }
                        )
                    })
                    .collect(),
                p.total,
            )
        }
    };

    if lines.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, line) in lines.iter().enumerate() {
        println!("{}. {}", (page - 1) * limit + i as i64 + 1, line);
    }
    println!();
    println!("{} total", total);
    Ok(())
}

async fn run_paths(
    config: &Config,
    source: String,
    target: String,
    datasource: Option<String>,
    max_depth: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let request = PathRequest {
        source,
        target,
        datasource_slug: datasource,
        max_depth: max_depth.unwrap_or(config.graph.default_max_depth),
    };
    let result = find_paths(&store, &request, config.graph.max_expansions).await?;

    println!(
        "{} path(s) from {} to {}{}",
        result.total_paths,
        result.source_table,
        result.target_table,
        if result.truncated { " (truncated)" } else { "" }
    );
    for (i, path) in result.paths.iter().enumerate() {
        if path.is_empty() {
            println!("{}. (already there)", i + 1);
            continue;
        }
        let hops: Vec<String> = path
            .iter()
            .map(|hop| {
                format!(
                    "{}.{} -> {}.{} [{}{}]",
                    hop.source.table_slug,
                    hop.source.column_slug,
                    hop.target.table_slug,
                    hop.target.column_slug,
                    hop.relationship.as_str(),
                    if hop.is_inferred { ", inferred" } else { "" }
                )
            })
            .collect();
        println!("{}. {}", i + 1, hops.join("; "));
    }
    Ok(())
}

async fn run_resolve(config: &Config, items_arg: &str) -> Result<()> {
    let raw = match items_arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => items_arg.to_string(),
    };
    let items: Vec<ContextItem> = serde_json::from_str(&raw)?;

    let (_, engine) = build_engine(config).await?;
    let resolver = ContextResolver::new(engine, config.resolver.clone());
    let graph = resolver.resolve(items).await?;

    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}
