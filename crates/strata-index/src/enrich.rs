//! Generated chunk summaries prepended before embedding.

use std::fmt::Write as _;
use std::sync::Arc;

use futures::{StreamExt as _, TryStreamExt as _};
use serde::{Deserialize, Serialize};
use strata_llm::TextGenerator;

use crate::error::{IndexError, Result};
use crate::store::PersistedChunk;
use crate::tokens::TokenCounter;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_PROMPT_TOKENS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Upper bound on in-flight generation calls per batch.
    pub max_concurrency: usize,
    pub temperature: f32,
    /// Budget for the chunk text embedded in the prompt.
    pub max_prompt_tokens: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            temperature: DEFAULT_TEMPERATURE,
            max_prompt_tokens: DEFAULT_MAX_PROMPT_TOKENS,
        }
    }
}

/// A chunk with its summary-prefixed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedChunk {
    pub index: usize,
    pub chunk: PersistedChunk,
    pub enriched_content: String,
}

impl EnrichedChunk {
    /// The chunk with `enriched_content` filled in.
    #[must_use]
    pub fn into_chunk(self) -> PersistedChunk {
        PersistedChunk {
            enriched_content: Some(self.enriched_content),
            ..self.chunk
        }
    }
}

pub struct ContextEnricher<G> {
    generator: G,
    counter: Arc<dyn TokenCounter>,
    config: EnrichmentConfig,
}

impl<G: TextGenerator> ContextEnricher<G> {
    #[must_use]
    pub fn new(generator: G, counter: Arc<dyn TokenCounter>, config: EnrichmentConfig) -> Self {
        Self {
            generator,
            counter,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    fn prompt(&self, chunk: &PersistedChunk, codebase_context: Option<&str>) -> Result<String> {
        let excerpt = self
            .counter
            .truncate(&chunk.content, self.config.max_prompt_tokens.max(1))?;
        let mut prompt = String::with_capacity(excerpt.len() + 512);
        prompt.push_str(
            "Write one or two sentences describing what the following code does \
             and where it fits in its file. Reply with the description only.\n\n",
        );
        let _ = writeln!(prompt, "File: {}", chunk.file_path);
        let _ = writeln!(prompt, "Language: {}", chunk.language);
        if !chunk.symbols.is_empty() {
            let _ = writeln!(prompt, "Symbols: {}", chunk.symbols.join(", "));
        }
        if let Some(context) = codebase_context.filter(|c| !c.trim().is_empty()) {
            let _ = writeln!(prompt, "Codebase: {}", context.trim());
        }
        let _ = write!(prompt, "\n<code>\n{excerpt}\n</code>\n");
        Ok(prompt)
    }

    /// Summary followed by a blank line and the original content.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or the summary is empty.
    pub async fn enrich_chunk(
        &self,
        chunk: &PersistedChunk,
        codebase_context: Option<&str>,
    ) -> Result<String> {
        let prompt = self.prompt(chunk, codebase_context)?;
        let summary = self
            .generator
            .generate(&prompt, self.config.temperature)
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(IndexError::Other(format!(
                "empty summary for chunk {}",
                chunk.id
            )));
        }
        Ok(format!("{summary}\n\n{}", chunk.content))
    }

    /// Enrich a batch with at most `max_concurrency` calls in flight.
    /// Results come back in input order; the first failure fails the batch.
    ///
    /// # Errors
    ///
    /// Returns the first enrichment error observed.
    pub async fn enrich_chunks(
        &self,
        chunks: &[PersistedChunk],
        codebase_context: Option<&str>,
    ) -> Result<Vec<EnrichedChunk>> {
        let limit = self.config.max_concurrency.max(1);
        let mut enriched: Vec<EnrichedChunk> = futures::stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| async move {
                let enriched_content = self.enrich_chunk(chunk, codebase_context).await?;
                Ok::<_, IndexError>(EnrichedChunk {
                    index,
                    chunk: chunk.clone(),
                    enriched_content,
                })
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;
        enriched.sort_by_key(|e| e.index);
        tracing::debug!(chunks = enriched.len(), limit, "enriched batch");
        Ok(enriched)
    }
}

impl<G> std::fmt::Debug for ContextEnricher<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEnricher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
