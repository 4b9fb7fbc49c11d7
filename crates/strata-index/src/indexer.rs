//! Project indexing orchestrator: walk → chunk → enrich → embed → store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_llm::{Embedder, TextGenerator};

use crate::chunker::Chunker;
use crate::context::contextualize_for_embedding;
use crate::enrich::ContextEnricher;
use crate::error::Result;
use crate::integrity::{self, IntegrityLeaf, IntegrityTree, content_hash};
use crate::languages::{Lang, detect_language, is_indexable};
use crate::store::{ChunkRepository, PersistedChunk};

pub const DEFAULT_MAX_TOKENS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Free-text description of the codebase passed to the enricher.
    pub codebase_context: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            codebase_context: None,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub chunks_enriched: usize,
    /// Previously indexed files no longer found on disk.
    pub files_removed: usize,
    /// Integrity root over every chunk stored in this run; empty if none.
    pub root_hash: String,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Orchestrates indexing over a project tree. Files are processed one at a
/// time; a failing file is recorded in the report and skipped.
pub struct Indexer<E, G, R> {
    embedder: E,
    enricher: Option<ContextEnricher<G>>,
    repository: Arc<R>,
    chunker: Chunker,
    config: IndexerConfig,
}

impl<E, G, R> Indexer<E, G, R>
where
    E: Embedder,
    G: TextGenerator,
    R: ChunkRepository,
{
    #[must_use]
    pub fn new(embedder: E, repository: Arc<R>, chunker: Chunker, config: IndexerConfig) -> Self {
        Self {
            embedder,
            enricher: None,
            repository,
            chunker,
            config,
        }
    }

    /// Enrich chunks with generated summaries before embedding.
    #[must_use]
    pub fn with_enricher(mut self, enricher: ContextEnricher<G>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Index every recognised file under `root`, honouring `.gitignore`.
    ///
    /// # Errors
    ///
    /// Returns an error only if purging removed files or saving the
    /// integrity tree fails; per-file failures land in
    /// [`IndexReport::errors`].
    pub async fn index_project(&self, root: &Path) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let entries = collect_files(root);
        let total = entries.len();
        tracing::info!(total, root = %root.display(), "indexing started");

        let mut leaves: Vec<IntegrityLeaf> = Vec::new();
        for (i, path) in entries.iter().enumerate() {
            report.files_scanned += 1;
            let rel_path = relative_path(root, path);

            match self.index_file(path, &rel_path).await {
                Ok(stored) => {
                    if !stored.chunks.is_empty() {
                        report.files_indexed += 1;
                    }
                    report.chunks_created += stored.chunks.len();
                    report.chunks_enriched += stored.enriched;
                    leaves.extend(stored.chunks.iter().map(IntegrityLeaf::from));
                    tracing::debug!(
                        file = %rel_path,
                        progress = format_args!("{}/{total}", i + 1),
                        chunks = stored.chunks.len(),
                    );
                }
                Err(e) => {
                    tracing::warn!(file = %rel_path, "indexing failed: {e}");
                    report.errors.push(format!("{rel_path}: {e}"));
                }
            }
        }

        let seen: HashSet<String> = entries.iter().map(|p| relative_path(root, p)).collect();
        report.files_removed = self.purge_missing(&seen).await?;

        let tree = integrity::build(leaves);
        self.repository.save_tree_nodes(tree.flatten()).await?;
        report.root_hash.clone_from(&tree.root_hash);

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            files = report.files_indexed,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            root_hash = %report.root_hash,
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Drop stored files that are no longer on disk. Returns how many were
    /// removed.
    async fn purge_missing(&self, seen: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for stale in self.repository.file_paths().await? {
            if seen.contains(&stale) {
                continue;
            }
            self.repository.delete_file(&stale).await?;
            tracing::debug!(file = %stale, "removed from index");
            removed += 1;
        }
        Ok(removed)
    }

    /// Chunk, enrich, embed and store one file, replacing its previous
    /// chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any pipeline stage
    /// fails for it.
    pub async fn index_file(&self, path: &Path, rel_path: &str) -> Result<StoredFile> {
        let source = tokio::fs::read_to_string(path).await?;
        let mut chunks =
            persisted_chunks(&self.chunker, &source, rel_path, self.config.max_tokens)?;

        let mut enriched = 0;
        if let Some(enricher) = &self.enricher
            && !chunks.is_empty()
        {
            chunks = enricher
                .enrich_chunks(&chunks, self.config.codebase_context.as_deref())
                .await?
                .into_iter()
                .map(crate::enrich::EnrichedChunk::into_chunk)
                .collect();
            enriched = chunks.len();
        }

        let texts: Vec<String> = chunks.iter().map(contextualize_for_embedding).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };

        let embeddings = chunks.iter().map(|c| c.id.clone()).zip(vectors).collect();
        self.repository
            .replace_file(rel_path, chunks.clone(), embeddings)
            .await?;

        Ok(StoredFile { chunks, enriched })
    }
}

/// Recognised, non-ignored files under `root` in path order.
#[must_use]
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && is_indexable(e.path()))
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// `path` relative to `root` with forward slashes.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Parse `source` into repository chunks. Ids are `path#Lstart-Lend` (with a
/// `~n` suffix when chunks share a line range), so re-indexing unchanged
/// content yields the same ids and hashes.
///
/// # Errors
///
/// Returns [`crate::IndexError::InvalidInput`] for a zero budget.
pub fn persisted_chunks(
    chunker: &Chunker,
    source: &str,
    rel_path: &str,
    max_tokens: usize,
) -> Result<Vec<PersistedChunk>> {
    let language = detect_language(Path::new(rel_path)).unwrap_or(Lang::Text);
    let file_id = content_hash(rel_path);
    let parsed = chunker.parse_source(source, rel_path, max_tokens)?;
    let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
    Ok(parsed
        .into_iter()
        .filter(|c| !c.content.trim().is_empty())
        .map(|c| {
            // word-split long lines can share a line range
            let n = seen.entry((c.start_line, c.end_line)).or_default();
            *n += 1;
            let mut id = format!("{rel_path}#L{}-L{}", c.start_line, c.end_line);
            if *n > 1 {
                id = format!("{id}~{n}");
            }
            (id, c)
        })
        .map(|(id, c)| PersistedChunk {
            id,
            file_id: file_id.clone(),
            file_path: rel_path.to_string(),
            content_hash: content_hash(&c.content),
            content: c.content,
            enriched_content: None,
            start_line: c.start_line,
            end_line: c.end_line,
            chunk_type: c.chunk_type,
            language,
            symbols: c.symbols,
            imports: c.imports,
            token_count: c.token_count,
        })
        .collect())
}

/// Chunks written for one file.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub chunks: Vec<PersistedChunk>,
    pub enriched: usize,
}

impl StoredFile {
    /// Integrity tree over this file's chunks.
    #[must_use]
    pub fn tree(&self) -> IntegrityTree {
        integrity::build(self.chunks.iter().map(IntegrityLeaf::from))
    }
}

impl<E, G, R> std::fmt::Debug for Indexer<E, G, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .field("enrich", &self.enricher.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use strata_llm::hashing::HashingEmbedder;
    use strata_llm::mock::MockProvider;

    use super::*;
    use crate::chunker::ChunkingStrategy;
    use crate::enrich::EnrichmentConfig;
    use crate::store::InMemoryChunkStore;
    use crate::tokens::HeuristicEstimator;

    type TestIndexer = Indexer<HashingEmbedder, MockProvider, InMemoryChunkStore>;

    fn indexer(store: Arc<InMemoryChunkStore>) -> TestIndexer {
        let chunker = Chunker::new(
            ChunkingStrategy::CodeStructure { language: Lang::Rust },
            Arc::new(HeuristicEstimator::default()),
        );
        Indexer::new(HashingEmbedder::default(), store, chunker, IndexerConfig::default())
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "use std::io;\n\nfn parse_config() {\n    let x = 1;\n}\n\nfn validate() {\n    check();\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "# Demo\n\nA small project.\n").unwrap();
        std::fs::write(dir.path().join("image.bin"), [0u8, 1, 2]).unwrap();
        dir
    }

    #[tokio::test]
    async fn indexes_recognised_files() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let report = indexer(Arc::clone(&store))
            .index_project(dir.path())
            .await
            .unwrap();

        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.files_indexed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.chunks_created, store.len());
        assert_eq!(report.root_hash.len(), 64);
        assert_eq!(store.tree_nodes().len(), 2 * report.chunks_created - 1);

        let lib = store.find_chunks_by_file("src/lib.rs").await.unwrap();
        assert!(lib.iter().any(|c| c.symbols.contains(&"parse_config".to_string())));
        assert!(lib.iter().all(|c| c.imports == vec!["std::io".to_string()]));
        assert!(lib.iter().all(|c| c.language == Lang::Rust));
        let hits = store
            .vector_search(HashingEmbedder::default().vector("parse config"), 3)
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn reindexing_is_deterministic_and_replaces() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let idx = indexer(Arc::clone(&store));
        let first = idx.index_project(dir.path()).await.unwrap();
        let second = idx.index_project(dir.path()).await.unwrap();
        assert_eq!(first.root_hash, second.root_hash);
        assert_eq!(store.len(), first.chunks_created);

        std::fs::write(dir.path().join("README.md"), "# Demo\n\nChanged.\n").unwrap();
        let third = idx.index_project(dir.path()).await.unwrap();
        assert_ne!(first.root_hash, third.root_hash);
    }

    #[tokio::test]
    async fn per_file_failures_are_recorded() {
        let dir = project();
        std::fs::write(dir.path().join("bad.rs"), [0xffu8, 0xfe, 0x00]).unwrap();
        let store = Arc::new(InMemoryChunkStore::new());
        let report = indexer(store).index_project(dir.path()).await.unwrap();
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bad.rs:"));
    }

    #[tokio::test]
    async fn enrichment_prefixes_summaries() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let enricher = ContextEnricher::new(
            MockProvider::default(),
            Arc::new(HeuristicEstimator::default()),
            EnrichmentConfig::default(),
        );
        let report = indexer(Arc::clone(&store))
            .with_enricher(enricher)
            .index_project(dir.path())
            .await
            .unwrap();
        assert_eq!(report.chunks_enriched, report.chunks_created);
        let readme = store.find_chunks_by_file("README.md").await.unwrap();
        assert!(readme.iter().all(|c| {
            c.enriched_content
                .as_deref()
                .is_some_and(|e| e.starts_with("mock response\n\n"))
        }));
    }

    #[tokio::test]
    async fn failing_enrichment_fails_only_that_file() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let enricher = ContextEnricher::new(
            MockProvider::failing(),
            Arc::new(HeuristicEstimator::default()),
            EnrichmentConfig::default(),
        );
        let report = indexer(Arc::clone(&store))
            .with_enricher(enricher)
            .index_project(dir.path())
            .await
            .unwrap();
        assert_eq!(report.errors.len(), 2);
        assert!(store.is_empty());
        assert!(report.root_hash.is_empty());
    }

    #[tokio::test]
    async fn deleted_files_are_purged() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let idx = indexer(Arc::clone(&store));
        idx.index_project(dir.path()).await.unwrap();

        std::fs::remove_file(dir.path().join("README.md")).unwrap();
        let report = idx.index_project(dir.path()).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert!(store.find_chunks_by_file("README.md").await.unwrap().is_empty());
        assert_eq!(store.file_paths().await.unwrap(), vec!["src/lib.rs"]);
        assert_eq!(store.len(), report.chunks_created);
    }

    #[tokio::test]
    async fn failing_file_keeps_previous_chunks() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let idx = indexer(Arc::clone(&store));
        idx.index_project(dir.path()).await.unwrap();
        let before = store.find_chunks_by_file("src/lib.rs").await.unwrap();

        std::fs::write(dir.path().join("src/lib.rs"), [0xffu8, 0xfe, 0x00]).unwrap();
        let report = idx.index_project(dir.path()).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.files_removed, 0);
        assert_eq!(store.find_chunks_by_file("src/lib.rs").await.unwrap(), before);
    }

    #[test]
    fn chunks_sharing_a_line_get_distinct_ids() {
        let chunker = Chunker::new(
            ChunkingStrategy::CodeStructure { language: Lang::Text },
            Arc::new(HeuristicEstimator::default()),
        );
        let line = "word ".repeat(40);
        let chunks = persisted_chunks(&chunker, &line, "notes.txt", 10).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].id, "notes.txt#L1-L1");
        assert_eq!(chunks[1].id, "notes.txt#L1-L1~2");
    }

    #[tokio::test]
    async fn stored_file_tree_matches_chunks() {
        let dir = project();
        let store = Arc::new(InMemoryChunkStore::new());
        let stored = indexer(store)
            .index_file(&dir.path().join("src/lib.rs"), "src/lib.rs")
            .await
            .unwrap();
        let tree = stored.tree();
        assert_eq!(tree.total_leaves, stored.chunks.len());
        assert!(tree.verify(stored.chunks.iter().map(IntegrityLeaf::from)));
    }
}
