//! Chunk repository contract and an in-memory implementation with cosine
//! vector search and BM25 lexical search.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use strata_llm::hashing::terms;

use crate::error::{IndexError, Result};
use crate::integrity::{FlatNode, IntegrityLeaf};
use crate::languages::Lang;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// A chunk as handed to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChunk {
    pub id: String,
    pub file_id: String,
    pub file_path: String,
    pub content: String,
    pub enriched_content: Option<String>,
    pub content_hash: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: String,
    pub language: Lang,
    pub symbols: Vec<String>,
    pub imports: Vec<String>,
    pub token_count: usize,
}

impl PersistedChunk {
    /// Enriched text when present, raw content otherwise.
    #[must_use]
    pub fn searchable_text(&self) -> &str {
        self.enriched_content.as_deref().unwrap_or(&self.content)
    }
}

impl From<&PersistedChunk> for IntegrityLeaf {
    fn from(chunk: &PersistedChunk) -> Self {
        IntegrityLeaf::new(&chunk.id, &chunk.content_hash, &chunk.file_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: PersistedChunk,
    pub score: f32,
}

/// Persistence for chunks, embeddings and integrity-tree nodes.
pub trait ChunkRepository: Send + Sync {
    /// Insert or replace chunks by id.
    fn save_chunks(&self, chunks: Vec<PersistedChunk>) -> BoxFuture<'_, Result<()>>;

    /// Store `(chunk_id, vector)` pairs.
    fn save_embeddings(&self, embeddings: Vec<(String, Vec<f32>)>) -> BoxFuture<'_, Result<()>>;

    /// Replace the stored integrity-tree nodes.
    fn save_tree_nodes(&self, nodes: Vec<FlatNode>) -> BoxFuture<'_, Result<()>>;

    /// Chunks of one file ordered by start line.
    fn find_chunks_by_file(&self, file_path: &str) -> BoxFuture<'_, Result<Vec<PersistedChunk>>>;

    /// Up to `limit` chunks of `file_path` ending before `line`, nearest
    /// last, in document order.
    fn find_chunks_before(
        &self,
        file_path: &str,
        line: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PersistedChunk>>>;

    /// Up to `limit` chunks of `file_path` starting after `line`, in
    /// document order.
    fn find_chunks_after(
        &self,
        file_path: &str,
        line: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PersistedChunk>>>;

    /// Cosine-similarity search, best first.
    fn vector_search(
        &self,
        query: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>>>;

    /// BM25 search over chunk text, best first. Scores are raw BM25.
    fn lexical_search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<ScoredChunk>>>;

    /// Remove every chunk and embedding of `file_path`.
    fn delete_file(&self, file_path: &str) -> BoxFuture<'_, Result<()>>;

    /// Swap the chunks and embeddings of `file_path` for new ones in a
    /// single write. On error the previous contents stay in place.
    fn replace_file(
        &self,
        file_path: &str,
        chunks: Vec<PersistedChunk>,
        embeddings: Vec<(String, Vec<f32>)>,
    ) -> BoxFuture<'_, Result<()>>;

    /// Distinct file paths that have stored chunks, sorted.
    fn file_paths(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

#[derive(Default)]
struct StoreState {
    chunks: HashMap<String, PersistedChunk>,
    embeddings: HashMap<String, Vec<f32>>,
    tree_nodes: Vec<FlatNode>,
}

/// Process-local repository.
pub struct InMemoryChunkStore {
    state: RwLock<StoreState>,
}

impl InMemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.chunks.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored integrity-tree nodes.
    #[must_use]
    pub fn tree_nodes(&self) -> Vec<FlatNode> {
        self.state
            .read()
            .map(|s| s.tree_nodes.clone())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| IndexError::Repository(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| IndexError::Repository(e.to_string()))
    }

    fn file_chunks(state: &StoreState, file_path: &str) -> Vec<PersistedChunk> {
        let mut chunks: Vec<PersistedChunk> = state
            .chunks
            .values()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore")
            .field("chunks", &self.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Okapi BM25 over a document set.
#[allow(clippy::cast_precision_loss)]
fn bm25(query: &[String], docs: &[(&PersistedChunk, Vec<String>)]) -> Vec<f32> {
    if docs.is_empty() || query.is_empty() {
        return vec![0.0; docs.len()];
    }
    let n = docs.len() as f32;
    let avg_len = docs.iter().map(|(_, t)| t.len()).sum::<usize>() as f32 / n;

    let mut df: HashMap<&str, usize> = HashMap::new();
    for (_, doc_terms) in docs {
        let mut seen: Vec<&str> = doc_terms.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *df.entry(term).or_default() += 1;
        }
    }

    docs.iter()
        .map(|(_, doc_terms)| {
            let len = doc_terms.len() as f32;
            query
                .iter()
                .map(|q| {
                    let freq = doc_terms.iter().filter(|t| *t == q).count() as f32;
                    if freq == 0.0 {
                        return 0.0;
                    }
                    let d = df.get(q.as_str()).copied().unwrap_or(0) as f32;
                    let idf = (1.0 + (n - d + 0.5) / (d + 0.5)).ln();
                    let norm = 1.0 - BM25_B + BM25_B * len / avg_len.max(1.0);
                    idf * freq * (BM25_K1 + 1.0) / (freq + BM25_K1 * norm)
                })
                .sum()
        })
        .collect()
}

fn rank(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });
    scored.truncate(limit);
    scored
}

impl ChunkRepository for InMemoryChunkStore {
    fn save_chunks(&self, chunks: Vec<PersistedChunk>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.write()?;
            for chunk in chunks {
                state.chunks.insert(chunk.id.clone(), chunk);
            }
            Ok(())
        })
    }

    fn save_embeddings(&self, embeddings: Vec<(String, Vec<f32>)>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.write()?;
            for (id, vector) in embeddings {
                if !state.chunks.contains_key(&id) {
                    return Err(IndexError::Repository(format!(
                        "embedding for unknown chunk {id}"
                    )));
                }
                state.embeddings.insert(id, vector);
            }
            Ok(())
        })
    }

    fn save_tree_nodes(&self, nodes: Vec<FlatNode>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write()?.tree_nodes = nodes;
            Ok(())
        })
    }

    fn find_chunks_by_file(&self, file_path: &str) -> BoxFuture<'_, Result<Vec<PersistedChunk>>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let state = self.read()?;
            Ok(Self::file_chunks(&state, &file_path))
        })
    }

    fn find_chunks_before(
        &self,
        file_path: &str,
        line: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PersistedChunk>>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let state = self.read()?;
            let mut before: Vec<PersistedChunk> = Self::file_chunks(&state, &file_path)
                .into_iter()
                .filter(|c| c.end_line < line)
                .collect();
            let skip = before.len().saturating_sub(limit);
            before.drain(..skip);
            Ok(before)
        })
    }

    fn find_chunks_after(
        &self,
        file_path: &str,
        line: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PersistedChunk>>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let state = self.read()?;
            Ok(Self::file_chunks(&state, &file_path)
                .into_iter()
                .filter(|c| c.start_line > line)
                .take(limit)
                .collect())
        })
    }

    fn vector_search(
        &self,
        query: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>>> {
        Box::pin(async move {
            let state = self.read()?;
            let scored = state
                .embeddings
                .iter()
                .filter_map(|(id, vector)| {
                    state.chunks.get(id).map(|chunk| ScoredChunk {
                        chunk: chunk.clone(),
                        score: cosine_similarity(&query, vector),
                    })
                })
                .collect();
            Ok(rank(scored, limit))
        })
    }

    fn lexical_search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<ScoredChunk>>> {
        let query_terms = terms(query);
        Box::pin(async move {
            let state = self.read()?;
            let docs: Vec<(&PersistedChunk, Vec<String>)> = state
                .chunks
                .values()
                .map(|c| (c, terms(c.searchable_text())))
                .collect();
            let scores = bm25(&query_terms, &docs);
            let scored = docs
                .iter()
                .zip(scores)
                .filter(|(_, s)| *s > 0.0)
                .map(|((chunk, _), score)| ScoredChunk {
                    chunk: (*chunk).clone(),
                    score,
                })
                .collect();
            Ok(rank(scored, limit))
        })
    }

    fn delete_file(&self, file_path: &str) -> BoxFuture<'_, Result<()>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut state = self.write()?;
            let ids: Vec<String> = state
                .chunks
                .values()
                .filter(|c| c.file_path == file_path)
                .map(|c| c.id.clone())
                .collect();
            for id in ids {
                state.chunks.remove(&id);
                state.embeddings.remove(&id);
            }
            Ok(())
        })
    }

    fn replace_file(
        &self,
        file_path: &str,
        chunks: Vec<PersistedChunk>,
        embeddings: Vec<(String, Vec<f32>)>,
    ) -> BoxFuture<'_, Result<()>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            if let Some(stray) = chunks.iter().find(|c| c.file_path != file_path) {
                return Err(IndexError::Repository(format!(
                    "chunk {} belongs to {}, not {file_path}",
                    stray.id, stray.file_path
                )));
            }
            if let Some((id, _)) = embeddings
                .iter()
                .find(|(id, _)| !chunks.iter().any(|c| &c.id == id))
            {
                return Err(IndexError::Repository(format!("embedding for unknown chunk {id}")));
            }

            let mut state = self.write()?;
            state.chunks.retain(|_, c| c.file_path != file_path);
            let StoreState {
                chunks: stored,
                embeddings: vectors,
                ..
            } = &mut *state;
            vectors.retain(|id, _| stored.contains_key(id));
            for chunk in chunks {
                stored.insert(chunk.id.clone(), chunk);
            }
            vectors.extend(embeddings);
            Ok(())
        })
    }

    fn file_paths(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.read()?;
            let mut paths: Vec<String> =
                state.chunks.values().map(|c| c.file_path.clone()).collect();
            paths.sort_unstable();
            paths.dedup();
            Ok(paths)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunk(
        id: &str,
        file: &str,
        lines: (usize, usize),
        content: &str,
    ) -> PersistedChunk {
        PersistedChunk {
            id: id.into(),
            file_id: format!("f-{file}"),
            file_path: file.into(),
            content: content.into(),
            enriched_content: None,
            content_hash: crate::integrity::content_hash(content),
            start_line: lines.0,
            end_line: lines.1,
            chunk_type: "function".into(),
            language: Lang::Rust,
            symbols: vec![],
            imports: vec![],
            token_count: content.len() / 4,
        }
    }

    async fn seeded() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        store
            .save_chunks(vec![
                chunk("a1", "a.rs", (1, 10), "fn parse_config() { read toml file }"),
                chunk("a2", "a.rs", (11, 20), "fn validate() { check fields }"),
                chunk("a3", "a.rs", (21, 30), "fn write_output() { serialize json }"),
                chunk("a4", "a.rs", (31, 40), "fn main() { parse and run }"),
                chunk("b1", "b.rs", (1, 5), "struct Cache { entries }"),
            ])
            .await
            .unwrap();
        store
    }

    #[test]
    fn cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn find_by_file_sorted() {
        let store = seeded().await;
        let chunks = store.find_chunks_by_file("a.rs").await.unwrap();
        let ids: Vec<_> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3", "a4"]);
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn neighbours_before_and_after() {
        let store = seeded().await;
        let before = store.find_chunks_before("a.rs", 31, 2).await.unwrap();
        let ids: Vec<_> = before.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a3"]);

        let after = store.find_chunks_after("a.rs", 10, 2).await.unwrap();
        let ids: Vec<_> = after.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a3"]);

        assert!(store.find_chunks_before("a.rs", 1, 2).await.unwrap().is_empty());
        assert!(store.find_chunks_after("b.rs", 5, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let store = seeded().await;
        store
            .save_embeddings(vec![
                ("a1".into(), vec![1.0, 0.0]),
                ("a2".into(), vec![0.0, 1.0]),
                ("b1".into(), vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        let hits = store.vector_search(vec![1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "a1");
        assert_eq!(hits[1].chunk.id, "b1");
    }

    #[tokio::test]
    async fn embedding_for_unknown_chunk_rejected() {
        let store = seeded().await;
        let err = store
            .save_embeddings(vec![("missing".into(), vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Repository(_)));
    }

    #[tokio::test]
    async fn lexical_search_bm25() {
        let store = seeded().await;
        let hits = store.lexical_search("parse config", 10).await.unwrap();
        assert_eq!(hits[0].chunk.id, "a1");
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert!(hits.iter().all(|h| h.chunk.id != "b1"));
        assert!(store.lexical_search("zzz", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lexical_search_prefers_enriched_text() {
        let store = InMemoryChunkStore::new();
        let mut c = chunk("x", "x.rs", (1, 2), "fn f() {}");
        c.enriched_content = Some("Computes invoice totals\n\nfn f() {}".into());
        store.save_chunks(vec![c]).await.unwrap();
        let hits = store.lexical_search("invoice", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_file_removes_chunks_and_embeddings() {
        let store = seeded().await;
        store
            .save_embeddings(vec![("a1".into(), vec![1.0])])
            .await
            .unwrap();
        store.delete_file("a.rs").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.vector_search(vec![1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_file_swaps_chunks_and_embeddings() {
        let store = seeded().await;
        store
            .save_embeddings(vec![("a1".into(), vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_file(
                "a.rs",
                vec![chunk("n1", "a.rs", (1, 4), "fn fresh() {}")],
                vec![("n1".into(), vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let ids: Vec<_> = store
            .find_chunks_by_file("a.rs")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["n1"]);
        assert_eq!(store.len(), 2);
        let hits = store.vector_search(vec![1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "n1");
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_file() {
        let store = seeded().await;
        let err = store
            .replace_file(
                "a.rs",
                vec![chunk("n1", "a.rs", (1, 4), "fn fresh() {}")],
                vec![("ghost".into(), vec![1.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Repository(_)));
        assert_eq!(store.find_chunks_by_file("a.rs").await.unwrap().len(), 4);

        let err = store
            .replace_file("a.rs", vec![chunk("b9", "b.rs", (1, 2), "x")], vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("belongs to b.rs"));
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn file_paths_sorted_and_distinct() {
        let store = seeded().await;
        assert_eq!(store.file_paths().await.unwrap(), vec!["a.rs", "b.rs"]);
        store.delete_file("b.rs").await.unwrap();
        assert_eq!(store.file_paths().await.unwrap(), vec!["a.rs"]);
    }

    #[tokio::test]
    async fn tree_nodes_replaced() {
        let store = InMemoryChunkStore::new();
        let tree = crate::integrity::build(vec![
            IntegrityLeaf::new("1", "h1", "a.rs"),
            IntegrityLeaf::new("2", "h2", "a.rs"),
        ]);
        store.save_tree_nodes(tree.flatten()).await.unwrap();
        assert_eq!(store.tree_nodes().len(), 3);
        store.save_tree_nodes(Vec::new()).await.unwrap();
        assert!(store.tree_nodes().is_empty());
    }
}
