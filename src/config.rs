use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strata_index::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use strata_index::chunker::{ChunkingStrategy, StrategyKind};
use strata_index::enrich::EnrichmentConfig;
use strata_index::expander::DEFAULT_NEIGHBOURS;
use strata_index::languages::Lang;
use strata_index::metrics::DEFAULT_MAX_RECORDS;
use strata_index::retriever::RetrievalConfig;
use strata_index::tokens::TokenizerProvider;

pub const DEFAULT_CONFIG_PATH: &str = "strata.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Offline feature-hashing embedder; no generation.
    #[default]
    Hashing,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hashing => "hashing",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Vector size of the hashing embedder.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "qwen3:8b".into()
}

fn default_embedding_model() -> String {
    "qwen3-embedding".into()
}

fn default_dimensions() -> usize {
    strata_llm::hashing::DEFAULT_DIMENSIONS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TokensConfig {
    #[serde(default)]
    pub provider: TokenizerProvider,
    /// Optional merge-rule vocabulary for the byte-pair estimator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_levels")]
    pub levels: usize,
    #[serde(default = "default_level_budgets")]
    pub max_tokens_per_level: Vec<usize>,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::CodeStructure
}

fn default_max_tokens() -> usize {
    strata_index::indexer::DEFAULT_MAX_TOKENS
}

fn default_levels() -> usize {
    3
}

fn default_level_budgets() -> Vec<usize> {
    vec![2048, 512, 128]
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_tokens: default_max_tokens(),
            levels: default_levels(),
            max_tokens_per_level: default_level_budgets(),
        }
    }
}

impl ChunkerConfig {
    /// Strategy value for a chunker; `language` only matters for code.
    #[must_use]
    pub fn strategy_for(&self, language: Lang) -> ChunkingStrategy {
        match self.strategy {
            StrategyKind::Semantic => ChunkingStrategy::Semantic,
            StrategyKind::CodeStructure => ChunkingStrategy::CodeStructure { language },
            StrategyKind::Late => ChunkingStrategy::Late,
            StrategyKind::Hierarchical => ChunkingStrategy::Hierarchical {
                levels: self.levels,
                max_tokens_per_level: self.max_tokens_per_level.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Neighbouring chunks fetched on each side when expanding.
    #[serde(default = "default_neighbours")]
    pub neighbours: usize,
}

fn default_alpha() -> f32 {
    RetrievalConfig::default().alpha
}

fn default_threshold() -> f32 {
    RetrievalConfig::default().threshold
}

fn default_limit() -> usize {
    RetrievalConfig::default().limit
}

fn default_neighbours() -> usize {
    DEFAULT_NEIGHBOURS
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            threshold: default_threshold(),
            limit: default_limit(),
            neighbours: default_neighbours(),
        }
    }
}

impl RetrievalSection {
    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            alpha: self.alpha,
            threshold: self.threshold,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnrichmentSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebase_context: Option<String>,
}

fn default_max_concurrency() -> usize {
    EnrichmentConfig::default().max_concurrency
}

fn default_temperature() -> f32 {
    EnrichmentConfig::default().temperature
}

fn default_max_prompt_tokens() -> usize {
    EnrichmentConfig::default().max_prompt_tokens
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrency: default_max_concurrency(),
            temperature: default_temperature(),
            max_prompt_tokens: default_max_prompt_tokens(),
            codebase_context: None,
        }
    }
}

impl EnrichmentSection {
    #[must_use]
    pub fn enrichment_config(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            max_concurrency: self.max_concurrency,
            temperature: self.temperature,
            max_prompt_tokens: self.max_prompt_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STRATA_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid STRATA_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("STRATA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("STRATA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("STRATA_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("STRATA_TOKENS_PROVIDER") {
            match v.parse::<TokenizerProvider>() {
                Ok(provider) => self.tokens.provider = provider,
                Err(e) => tracing::warn!("ignoring STRATA_TOKENS_PROVIDER: {e}"),
            }
        }
        if let Ok(v) = std::env::var("STRATA_CHUNKER_STRATEGY") {
            match v.parse::<StrategyKind>() {
                Ok(kind) => self.chunker.strategy = kind,
                Err(e) => tracing::warn!("ignoring STRATA_CHUNKER_STRATEGY: {e}"),
            }
        }
        if let Ok(v) = std::env::var("STRATA_CHUNKER_MAX_TOKENS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunker.max_tokens = n;
        }
        if let Ok(v) = std::env::var("STRATA_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.cache.ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("STRATA_CACHE_MAX_ENTRIES")
            && let Ok(n) = v.parse::<usize>()
        {
            self.cache.max_entries = n;
        }
        if let Ok(v) = std::env::var("STRATA_RETRIEVAL_ALPHA")
            && let Ok(alpha) = v.parse::<f32>()
        {
            self.retrieval.alpha = alpha.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("STRATA_RETRIEVAL_THRESHOLD")
            && let Ok(threshold) = v.parse::<f32>()
        {
            self.retrieval.threshold = threshold;
        }
        if let Ok(v) = std::env::var("STRATA_RETRIEVAL_LIMIT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.limit = n;
        }
        if let Ok(v) = std::env::var("STRATA_ENRICHMENT_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.enrichment.enabled = enabled;
        }
        if let Ok(v) = std::env::var("STRATA_ENRICHMENT_MAX_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.enrichment.max_concurrency = n.max(1);
        }
        if let Ok(v) = std::env::var("STRATA_METRICS_MAX_RECORDS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.metrics.max_records = n;
        }
    }
}
