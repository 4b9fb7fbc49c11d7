//! Hybrid retrieval: cached vector + BM25 search with score fusion.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strata_llm::Embedder;

use crate::cache::{CacheKey, CacheStats, RetrievalCache};
use crate::context::chunk_display_header;
use crate::error::Result;
use crate::metrics::{MetricsCollector, RetrievalMetric, SearchMetric};
use crate::store::{ChunkRepository, PersistedChunk};

/// Each backend is asked for this many times `limit` candidates.
const CANDIDATE_FACTOR: usize = 3;

/// `alpha * vector + (1 - alpha) * bm25`.
#[must_use]
pub fn hybrid_score(vector_similarity: f32, bm25: f32, alpha: f32) -> f32 {
    alpha * vector_similarity + (1.0 - alpha) * bm25
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of the vector score.
    pub alpha: f32,
    /// Minimum hybrid score kept after fusion.
    pub threshold: f32,
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            threshold: 0.5,
            limit: 10,
        }
    }
}

/// One fused result. `lexical_score` is normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridHit {
    pub chunk: PersistedChunk,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub score: f32,
}

/// Search outcome with whether it was served from cache.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<HybridHit>,
    pub cache_hit: bool,
    pub latency: Duration,
}

/// Hits rendered for a prompt.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub hits: Vec<HybridHit>,
    pub context: String,
    pub cache_hit: bool,
}

pub struct HybridRetriever<E, R> {
    embedder: E,
    repository: Arc<R>,
    config: RetrievalConfig,
    scope_id: String,
    cache: RetrievalCache<Vec<HybridHit>>,
    metrics: MetricsCollector,
}

impl<E: Embedder, R: ChunkRepository> HybridRetriever<E, R> {
    #[must_use]
    pub fn new(
        embedder: E,
        repository: Arc<R>,
        config: RetrievalConfig,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            repository,
            config,
            scope_id: scope_id.into(),
            cache: RetrievalCache::default(),
            metrics: MetricsCollector::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: RetrievalCache<Vec<HybridHit>>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop cached results for this retriever's scope, e.g. after re-indexing.
    pub fn invalidate(&self) -> usize {
        self.cache.invalidate_scope(&self.scope_id)
    }

    /// Embed `query`, consult the cache, and on a miss fuse vector and
    /// lexical results.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or either repository search fails.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let start = Instant::now();
        let query_vector = self.embedder.embed(query).await?;
        let key = CacheKey::new(
            self.scope_id.clone(),
            &query_vector,
            self.config.limit,
            self.config.threshold,
        );

        if let Some(hits) = self.cache.get(&key) {
            let latency = start.elapsed();
            self.metrics
                .record_search(SearchMetric::now(latency, hits.len(), true));
            tracing::debug!(results = hits.len(), "retrieval cache hit");
            return Ok(SearchOutcome {
                hits,
                cache_hit: true,
                latency,
            });
        }

        let candidates = self.config.limit.max(1) * CANDIDATE_FACTOR;
        let (vector_hits, lexical_hits) = tokio::try_join!(
            self.repository.vector_search(query_vector, candidates),
            self.repository.lexical_search(query, candidates),
        )?;

        let max_bm25 = lexical_hits
            .iter()
            .map(|h| h.score)
            .fold(0.0f32, f32::max);
        let mut fused: HashMap<String, HybridHit> = HashMap::new();
        for hit in vector_hits {
            fused.insert(
                hit.chunk.id.clone(),
                HybridHit {
                    chunk: hit.chunk,
                    vector_score: hit.score,
                    lexical_score: 0.0,
                    score: 0.0,
                },
            );
        }
        for hit in lexical_hits {
            let normalized = if max_bm25 > 0.0 { hit.score / max_bm25 } else { 0.0 };
            fused
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| HybridHit {
                    chunk: hit.chunk,
                    vector_score: 0.0,
                    lexical_score: 0.0,
                    score: 0.0,
                })
                .lexical_score = normalized;
        }

        let alpha = self.config.alpha;
        let mut hits: Vec<HybridHit> = fused
            .into_values()
            .map(|mut h| {
                h.score = hybrid_score(h.vector_score, h.lexical_score, alpha);
                h
            })
            .filter(|h| h.score >= self.config.threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });
        hits.truncate(self.config.limit);

        self.cache.set(key, hits.clone(), None);
        let latency = start.elapsed();
        self.metrics
            .record_search(SearchMetric::now(latency, hits.len(), false));
        tracing::debug!(results = hits.len(), ?latency, "hybrid search");
        Ok(SearchOutcome {
            hits,
            cache_hit: false,
            latency,
        })
    }

    /// Search and render the hits as a `<code_context>` block.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::search`] errors.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        let start = Instant::now();
        let outcome = self.search(query).await?;
        let context = format_as_context(&outcome.hits);
        self.metrics.record_retrieval(RetrievalMetric::now(
            start.elapsed(),
            context.len(),
            outcome.cache_hit,
        ));
        Ok(RetrievedContext {
            hits: outcome.hits,
            context,
            cache_hit: outcome.cache_hit,
        })
    }
}

impl<E, R> std::fmt::Debug for HybridRetriever<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("config", &self.config)
            .field("scope_id", &self.scope_id)
            .finish_non_exhaustive()
    }
}

/// Render hits as an XML-ish block for prompt injection. Empty for no hits.
#[must_use]
pub fn format_as_context(hits: &[HybridHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for hit in hits {
        let chunk = &hit.chunk;
        let name = chunk.symbols.first().unwrap_or(&chunk.chunk_type);
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" name=\"{}\" score=\"{:.2}\">",
            chunk.file_path, chunk.start_line, chunk.end_line, name, hit.score,
        );
        out.push_str(&chunk.content);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}

/// One line per hit: score and display header.
#[must_use]
pub fn format_summary(hits: &[HybridHit]) -> String {
    let mut out = String::new();
    for hit in hits {
        let _ = writeln!(
            out,
            "{:.3}  {}",
            hit.score,
            chunk_display_header(&hit.chunk)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use strata_llm::mock::MockProvider;

    use super::*;
    use crate::store::InMemoryChunkStore;
    use crate::store::tests::chunk;

    #[test]
    fn hybrid_score_alpha_extremes() {
        assert!((hybrid_score(0.8, 0.3, 1.0) - 0.8).abs() < f32::EPSILON);
        assert!((hybrid_score(0.8, 0.3, 0.0) - 0.3).abs() < f32::EPSILON);
        assert!((hybrid_score(1.0, 0.0, 0.7) - 0.7).abs() < 1e-6);
    }

    async fn store() -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::new());
        store
            .save_chunks(vec![
                chunk("a1", "a.rs", (1, 10), "fn parse_config() { read toml file }"),
                chunk("a2", "a.rs", (11, 20), "fn validate() { check fields }"),
                chunk("b1", "b.rs", (1, 5), "fn render() { draw widgets }"),
            ])
            .await
            .unwrap();
        store
            .save_embeddings(vec![
                ("a1".into(), vec![1.0, 0.0]),
                ("a2".into(), vec![0.0, 1.0]),
                ("b1".into(), vec![0.6, 0.8]),
            ])
            .await
            .unwrap();
        store
    }

    fn retriever(
        store: Arc<InMemoryChunkStore>,
        config: RetrievalConfig,
    ) -> HybridRetriever<MockProvider, InMemoryChunkStore> {
        HybridRetriever::new(
            MockProvider::default().with_embedding(vec![1.0, 0.0]),
            store,
            config,
            "repo",
        )
    }

    #[tokio::test]
    async fn fuses_vector_and_lexical() {
        let r = retriever(
            store().await,
            RetrievalConfig {
                threshold: 0.0,
                ..RetrievalConfig::default()
            },
        )
        .search("parse config")
        .await
        .unwrap();
        assert!(!r.cache_hit);
        let top = &r.hits[0];
        assert_eq!(top.chunk.id, "a1");
        assert!((top.lexical_score - 1.0).abs() < 1e-6);
        assert!((top.score - 1.0).abs() < 1e-5);
        assert!(r.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn threshold_filters_weak_hits() {
        let r = retriever(store().await, RetrievalConfig::default());
        let out = r.search("parse config").await.unwrap();
        // a2 has zero cosine and no lexical overlap
        assert!(out.hits.iter().all(|h| h.score >= 0.5));
        assert!(out.hits.iter().all(|h| h.chunk.id != "a2"));
    }

    #[tokio::test]
    async fn limit_truncates() {
        let r = retriever(
            store().await,
            RetrievalConfig {
                threshold: 0.0,
                limit: 1,
                ..RetrievalConfig::default()
            },
        );
        assert_eq!(r.search("parse").await.unwrap().hits.len(), 1);
    }

    #[tokio::test]
    async fn second_search_hits_cache() {
        let r = retriever(store().await, RetrievalConfig::default());
        let first = r.search("parse config").await.unwrap();
        let second = r.search("parse config").await.unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.hits, second.hits);

        let stats = r.metrics().search_stats();
        assert_eq!(stats.count, 2);
        assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(r.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn invalidate_clears_scope() {
        let r = retriever(store().await, RetrievalConfig::default());
        r.search("parse config").await.unwrap();
        assert_eq!(r.invalidate(), 1);
        assert!(!r.search("parse config").await.unwrap().cache_hit);
    }

    #[tokio::test]
    async fn retrieve_renders_and_records() {
        let r = retriever(store().await, RetrievalConfig::default());
        let out = r.retrieve("parse config").await.unwrap();
        assert!(out.context.starts_with("<code_context>"));
        assert!(out.context.contains("file=\"a.rs\""));
        let stats = r.metrics().retrieval_stats();
        assert_eq!(stats.count, 1);
        #[allow(clippy::cast_precision_loss)]
        let size = out.context.len() as f64;
        assert!((stats.mean_size - size).abs() < 1e-9);
    }

    #[tokio::test]
    async fn embed_failure_propagates() {
        let r = HybridRetriever::new(
            MockProvider::failing(),
            store().await,
            RetrievalConfig::default(),
            "repo",
        );
        assert!(r.search("x").await.is_err());
    }

    #[test]
    fn format_as_context_empty() {
        assert_eq!(format_as_context(&[]), "");
    }

    #[test]
    fn format_as_context_xml() {
        let mut c = chunk("a1", "src/lib.rs", (1, 3), "fn hello() {}");
        c.symbols = vec!["hello".into()];
        let hits = vec![HybridHit {
            chunk: c,
            vector_score: 0.9,
            lexical_score: 0.7,
            score: 0.85,
        }];
        let xml = format_as_context(&hits);
        assert!(xml.contains("<code_context>"));
        assert!(xml.contains("</code_context>"));
        assert!(xml.contains("file=\"src/lib.rs\""));
        assert!(xml.contains("name=\"hello\""));
        assert!(xml.contains("score=\"0.85\""));
        assert!(xml.contains("fn hello() {}"));
        assert!(format_summary(&hits).starts_with("0.850  src/lib.rs :: hello"));
    }
}
