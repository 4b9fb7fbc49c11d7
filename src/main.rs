mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use strata_index::cache::RetrievalCache;
use strata_index::chunker::{Chunker, ChunkingStrategy, StrategyKind};
use strata_index::enrich::ContextEnricher;
use strata_index::expander::{ContextExpander, format_expanded_context};
use strata_index::indexer::{
    IndexReport, Indexer, IndexerConfig, collect_files, persisted_chunks, relative_path,
};
use strata_index::integrity::{self, IntegrityLeaf};
use strata_index::languages::{Lang, detect_language};
use strata_index::metrics::MetricsCollector;
use strata_index::retriever::{HybridRetriever, format_as_context, format_summary};
use strata_index::store::InMemoryChunkStore;
use strata_index::tokens::{Estimator, TokenCounter, TokenizerProvider, Vocabulary, estimator_for};
use strata_llm::any::AnyProvider;
use strata_llm::hashing::HashingEmbedder;
use strata_llm::ollama::OllamaProvider;

use crate::config::{Config, DEFAULT_CONFIG_PATH, ProviderKind};

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Token-bounded code indexing and hybrid retrieval")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index a directory and print the run report.
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Index a directory, then run a hybrid query against it.
    Search {
        query: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Widen each hit with neighbouring chunks of the same file.
        #[arg(long)]
        expand: bool,
        /// Print one summary line per hit instead of the context block.
        #[arg(long)]
        brief: bool,
    },
    /// Chunk a single file and print the chunks as JSON.
    Chunk {
        file: PathBuf,
        /// semantic, code_structure, late or hierarchical.
        #[arg(long)]
        strategy: Option<StrategyKind>,
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Estimate the token count of a file, optionally truncating it.
    Tokens {
        file: PathBuf,
        /// openai, anthropic, gemini, llama, mistral or generic.
        #[arg(long)]
        provider: Option<TokenizerProvider>,
        /// Print the longest prefix within this many tokens.
        #[arg(long)]
        truncate: Option<usize>,
    },
    /// Print the integrity root hash of a directory's chunks.
    Tree {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Also print the flattened node list as JSON.
        #[arg(long)]
        nodes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    tracing::debug!(path = %cli.config.display(), provider = %config.llm.provider, "config loaded");

    match cli.command {
        Command::Index { path, json } => {
            let store = Arc::new(InMemoryChunkStore::new());
            let report = index(&config, &path, &store).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Search {
            query,
            path,
            expand,
            brief,
        } => search(&config, &path, &query, expand, brief).await?,
        Command::Chunk {
            file,
            strategy,
            max_tokens,
        } => chunk(&config, &file, strategy, max_tokens)?,
        Command::Tokens {
            file,
            provider,
            truncate,
        } => tokens(&config, &file, provider, truncate)?,
        Command::Tree { path, nodes } => tree(&config, &path, nodes)?,
    }
    Ok(())
}

fn create_provider(config: &Config) -> AnyProvider {
    match config.llm.provider {
        ProviderKind::Hashing => AnyProvider::Hashing(HashingEmbedder::new(config.llm.dimensions)),
        ProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        )),
    }
}

fn token_counter(
    config: &Config,
    provider: TokenizerProvider,
) -> anyhow::Result<Arc<dyn TokenCounter>> {
    let estimator = match (estimator_for(provider), &config.tokens.vocabulary) {
        (Estimator::Bpe(bpe), Some(path)) => {
            let vocabulary = Vocabulary::load(path)
                .with_context(|| format!("failed to load vocabulary {}", path.display()))?;
            tracing::info!(entries = vocabulary.len(), "loaded BPE vocabulary");
            Estimator::Bpe(bpe.with_vocabulary(vocabulary))
        }
        (estimator, Some(_)) => {
            tracing::warn!(
                profile = estimator.profile_name(),
                "vocabulary ignored for a non byte-level profile"
            );
            estimator
        }
        (estimator, None) => estimator,
    };
    Ok(Arc::new(estimator))
}

async fn index(
    config: &Config,
    root: &Path,
    store: &Arc<InMemoryChunkStore>,
) -> anyhow::Result<IndexReport> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let counter = token_counter(config, config.tokens.provider)?;
    let chunker = Chunker::new(config.chunker.strategy_for(Lang::Text), Arc::clone(&counter));
    let provider = create_provider(config);
    let indexer_config = IndexerConfig {
        max_tokens: config.chunker.max_tokens,
        codebase_context: config.enrichment.codebase_context.clone(),
    };

    let mut indexer: Indexer<AnyProvider, AnyProvider, InMemoryChunkStore> =
        Indexer::new(provider.clone(), Arc::clone(store), chunker, indexer_config);
    if config.enrichment.enabled {
        if provider.supports_generation() {
            indexer = indexer.with_enricher(ContextEnricher::new(
                provider,
                counter,
                config.enrichment.enrichment_config(),
            ));
        } else {
            tracing::warn!(
                provider = %config.llm.provider,
                "enrichment enabled but the provider cannot generate text; skipping"
            );
        }
    }

    indexer
        .index_project(root)
        .await
        .context("indexing failed")
}

fn print_report(report: &IndexReport) {
    println!(
        "indexed {}/{} files, {} chunks ({} enriched) in {} ms",
        report.files_indexed,
        report.files_scanned,
        report.chunks_created,
        report.chunks_enriched,
        report.duration_ms
    );
    if report.files_removed > 0 {
        println!("removed {} deleted files", report.files_removed);
    }
    if !report.root_hash.is_empty() {
        println!("root {}", report.root_hash);
    }
    for error in &report.errors {
        println!("error: {error}");
    }
}

async fn search(
    config: &Config,
    root: &Path,
    query: &str,
    expand: bool,
    brief: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryChunkStore::new());
    let report = index(config, root, &store).await?;
    tracing::info!(chunks = report.chunks_created, "index ready");

    let (metrics, _) = MetricsCollector::new(config.metrics.max_records);
    let retriever = HybridRetriever::new(
        create_provider(config),
        Arc::clone(&store),
        config.retrieval.retrieval_config(),
        root.display().to_string(),
    )
    .with_cache(RetrievalCache::new(config.cache.ttl(), config.cache.max_entries))
    .with_metrics(metrics);

    let outcome = retriever.search(query).await?;
    if outcome.hits.is_empty() {
        println!("no results above threshold {}", config.retrieval.threshold);
        return Ok(());
    }

    if brief {
        print!("{}", format_summary(&outcome.hits));
    } else if expand {
        let expander = ContextExpander::new(Arc::clone(&store), config.retrieval.neighbours);
        let chunks: Vec<_> = outcome.hits.iter().map(|h| h.chunk.clone()).collect();
        let expanded = expander.expand_batch(&chunks).await?;
        println!("{}", format_expanded_context(&expanded));
    } else {
        println!("{}", format_as_context(&outcome.hits));
    }

    let stats = retriever.metrics().search_stats();
    tracing::info!(
        results = outcome.hits.len(),
        latency_ms = stats.mean_ms,
        cache_healthy = retriever.cache_stats().is_healthy,
        "search complete"
    );
    Ok(())
}

fn chunk(
    config: &Config,
    file: &Path,
    strategy: Option<StrategyKind>,
    max_tokens: Option<usize>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let language = detect_language(file).unwrap_or(Lang::Text);
    let mut chunker_config = config.chunker.clone();
    if let Some(kind) = strategy {
        chunker_config.strategy = kind;
    }
    let max_tokens = max_tokens.unwrap_or(chunker_config.max_tokens);
    let counter = token_counter(config, config.tokens.provider)?;
    let strategy = chunker_config.strategy_for(language);
    let chunker = Chunker::new(strategy.clone(), counter);

    let json = match strategy {
        ChunkingStrategy::Hierarchical {
            levels,
            max_tokens_per_level,
        } => serde_json::to_string_pretty(&chunker.chunk_hierarchically(
            &text,
            levels,
            &max_tokens_per_level,
        )?)?,
        ChunkingStrategy::CodeStructure { language } => {
            serde_json::to_string_pretty(&chunker.chunk_code(&text, max_tokens, language)?)?
        }
        other => serde_json::to_string_pretty(&chunker.chunk(&text, max_tokens, other.kind())?)?,
    };
    println!("{json}");
    Ok(())
}

fn tokens(
    config: &Config,
    file: &Path,
    provider: Option<TokenizerProvider>,
    truncate: Option<usize>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let provider = provider.unwrap_or(config.tokens.provider);
    let counter = token_counter(config, provider)?;
    match truncate {
        Some(max) => print!("{}", counter.truncate(&text, max)?),
        None => println!("{} tokens ({})", counter.count_tokens(&text), provider.as_str()),
    }
    Ok(())
}

fn tree(config: &Config, root: &Path, print_nodes: bool) -> anyhow::Result<()> {
    let counter = token_counter(config, config.tokens.provider)?;
    let chunker = Chunker::new(config.chunker.strategy_for(Lang::Text), counter);

    let mut leaves = Vec::new();
    for path in collect_files(root) {
        let rel = relative_path(root, &path);
        let Ok(source) = std::fs::read_to_string(&path) else {
            tracing::warn!(file = %rel, "skipping unreadable file");
            continue;
        };
        let chunks = persisted_chunks(&chunker, &source, &rel, config.chunker.max_tokens)?;
        leaves.extend(chunks.iter().map(IntegrityLeaf::from));
    }

    let tree = integrity::build(leaves);
    println!("{} leaves, root {}", tree.total_leaves, tree.root_hash);
    if print_nodes {
        println!("{}", serde_json::to_string_pretty(&tree.flatten())?);
    }
    Ok(())
}
