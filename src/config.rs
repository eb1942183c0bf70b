use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant: `score = Σ 1/(k + rank)`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Candidates fetched from each branch before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_k: default_candidate_k(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_k() -> i64 {
    80
}
fn default_limit() -> i64 {
    10
}
fn default_max_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Depth bound used when a caller does not pass one.
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    /// Queue-expansion budget; exhaustion truncates rather than fails.
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            max_expansions: default_max_expansions(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}
fn default_max_expansions() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Top hits kept per resolution item.
    #[serde(default = "default_item_limit")]
    pub item_limit: i64,
    #[serde(default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            item_limit: default_item_limit(),
            item_timeout_ms: default_item_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_item_limit() -> i64 {
    5
}
fn default_item_timeout_ms() -> u64 {
    2_000
}
fn default_request_timeout_ms() -> u64 {
    8_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.rrf_k < 1.0 {
        anyhow::bail!("retrieval.rrf_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.max_limit < config.retrieval.default_limit {
        anyhow::bail!("retrieval.max_limit must be >= retrieval.default_limit");
    }

    if config.graph.default_max_depth == 0 {
        anyhow::bail!("graph.default_max_depth must be > 0");
    }
    if config.graph.max_expansions == 0 {
        anyhow::bail!("graph.max_expansions must be > 0");
    }

    if config.resolver.item_limit < 1 {
        anyhow::bail!("resolver.item_limit must be >= 1");
    }
    if config.resolver.request_timeout_ms < config.resolver.item_timeout_ms {
        anyhow::bail!("resolver.request_timeout_ms must be >= resolver.item_timeout_ms");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config(
            r#"
            [db]
            path = "atlas.db"
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.retrieval.candidate_k, 80);
        assert_eq!(config.graph.default_max_depth, 3);
        assert_eq!(config.resolver.item_limit, 5);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let f = write_config(
            r#"
            [db]
            path = "atlas.db"
            [server]
            bind = "127.0.0.1:8080"
            [embedding]
            provider = "openai"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_depth() {
        let f = write_config(
            r#"
            [db]
            path = "atlas.db"
            [server]
            bind = "127.0.0.1:8080"
            [graph]
            default_max_depth = 0
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
