//! Widens retrieved chunks with their neighbours from the same file.

use std::fmt::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{ChunkRepository, PersistedChunk};

pub const DEFAULT_NEIGHBOURS: usize = 2;

pub const BEFORE_MARKER: &str = "--- context before ---";
pub const MAIN_MARKER: &str = "--- retrieved chunk ---";
pub const AFTER_MARKER: &str = "--- context after ---";

/// A chunk plus up to K neighbours on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedChunk {
    pub chunk: PersistedChunk,
    pub before: Vec<PersistedChunk>,
    pub after: Vec<PersistedChunk>,
    /// Before, main and after content separated by marker lines. Just the
    /// chunk content when there are no neighbours.
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl ExpandedChunk {
    fn assemble(
        chunk: PersistedChunk,
        before: Vec<PersistedChunk>,
        after: Vec<PersistedChunk>,
    ) -> Self {
        if before.is_empty() && after.is_empty() {
            return Self {
                content: chunk.content.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                chunk,
                before,
                after,
            };
        }

        let mut content = String::new();
        if !before.is_empty() {
            content.push_str(BEFORE_MARKER);
            content.push('\n');
            for c in &before {
                content.push_str(&c.content);
                content.push('\n');
            }
        }
        content.push_str(MAIN_MARKER);
        content.push('\n');
        content.push_str(&chunk.content);
        if !after.is_empty() {
            content.push('\n');
            content.push_str(AFTER_MARKER);
            for c in &after {
                content.push('\n');
                content.push_str(&c.content);
            }
        }

        let neighbours = || before.iter().chain(after.iter());
        let start_line = neighbours()
            .map(|c| c.start_line)
            .min()
            .map_or(chunk.start_line, |s| s.min(chunk.start_line));
        let end_line = neighbours()
            .map(|c| c.end_line)
            .max()
            .map_or(chunk.end_line, |e| e.max(chunk.end_line));

        Self {
            chunk,
            before,
            after,
            content,
            start_line,
            end_line,
        }
    }

    #[must_use]
    pub fn neighbour_count(&self) -> usize {
        self.before.len() + self.after.len()
    }
}

pub struct ContextExpander<R> {
    repository: Arc<R>,
    neighbours: usize,
}

impl<R: ChunkRepository> ContextExpander<R> {
    #[must_use]
    pub fn new(repository: Arc<R>, neighbours: usize) -> Self {
        Self {
            repository,
            neighbours,
        }
    }

    /// Fetch neighbours before and after `chunk` concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first repository error.
    pub async fn expand(&self, chunk: &PersistedChunk) -> Result<ExpandedChunk> {
        if self.neighbours == 0 {
            return Ok(ExpandedChunk::assemble(chunk.clone(), Vec::new(), Vec::new()));
        }
        let (before, after) = tokio::try_join!(
            self.repository
                .find_chunks_before(&chunk.file_path, chunk.start_line, self.neighbours),
            self.repository
                .find_chunks_after(&chunk.file_path, chunk.end_line, self.neighbours),
        )?;
        Ok(ExpandedChunk::assemble(chunk.clone(), before, after))
    }

    /// Expand every chunk concurrently; output order follows input order.
    ///
    /// # Errors
    ///
    /// Returns the first repository error.
    pub async fn expand_batch(&self, chunks: &[PersistedChunk]) -> Result<Vec<ExpandedChunk>> {
        let expanded = futures::future::try_join_all(chunks.iter().map(|c| self.expand(c))).await?;
        tracing::debug!(
            chunks = expanded.len(),
            neighbours = expanded.iter().map(ExpandedChunk::neighbour_count).sum::<usize>(),
            "expanded chunks"
        );
        Ok(expanded)
    }
}

impl<R> std::fmt::Debug for ContextExpander<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextExpander")
            .field("neighbours", &self.neighbours)
            .finish_non_exhaustive()
    }
}

/// Render expanded chunks as a `<code_context>` block using the widened
/// line ranges.
#[must_use]
pub fn format_expanded_context(expanded: &[ExpandedChunk]) -> String {
    if expanded.is_empty() {
        return String::new();
    }
    let mut out = String::from("<code_context>\n");
    for e in expanded {
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" neighbours=\"{}\">",
            e.chunk.file_path,
            e.start_line,
            e.end_line,
            e.neighbour_count(),
        );
        out.push_str(&e.content);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}
