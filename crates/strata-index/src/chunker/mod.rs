//! Token-bounded chunking with four strategies over one packing routine.

mod hierarchy;
mod pack;

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use hierarchy::HierarchicalChunk;
use pack::{CODE, PROSE, SECTION, SENTENCE, pack};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, detect_language};
use crate::segmenter::{
    Symbol, extract_imports, extract_logical_units, extract_symbols, split_paragraphs,
    split_sections, split_sentences,
};
use crate::tokens::TokenCounter;

/// Chunking strategy with the parameters each variant needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Blank-line paragraphs, re-split into sentences then words on overflow.
    Semantic,
    /// Brace-balanced declarations, re-split into lines then words.
    CodeStructure { language: Lang },
    /// Sentences accumulated directly.
    Late,
    /// Header sections, recursively re-chunked per level budget.
    Hierarchical {
        levels: usize,
        max_tokens_per_level: Vec<usize>,
    },
}

/// Strategy discriminant used to ask a chunker for a particular behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Semantic,
    CodeStructure,
    Late,
    Hierarchical,
}

impl StrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::CodeStructure => "code_structure",
            Self::Late => "late",
            Self::Hierarchical => "hierarchical",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "code" | "code_structure" => Ok(Self::CodeStructure),
            "late" => Ok(Self::Late),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(format!("unknown chunking strategy: {other}")),
        }
    }
}

impl ChunkingStrategy {
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Semantic => StrategyKind::Semantic,
            Self::CodeStructure { .. } => StrategyKind::CodeStructure,
            Self::Late => StrategyKind::Late,
            Self::Hierarchical { .. } => StrategyKind::Hierarchical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Lang>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// One chunk of a document. `byte_range` indexes the chunked text and
/// `content` is exactly that slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub token_count: usize,
    pub byte_range: Range<usize>,
    pub metadata: ChunkMetadata,
}

/// A chunk of a source file with line range, symbols and imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: String,
    pub symbols: Vec<String>,
    pub imports: Vec<String>,
    pub token_count: usize,
}

/// Strategy-bound chunker.
///
/// Each instance serves one strategy; asking it for another fails with
/// [`IndexError::UnsupportedStrategy`] instead of degrading silently.
#[derive(Clone)]
pub struct Chunker {
    strategy: ChunkingStrategy,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

fn validate_budget(max_tokens: usize) -> Result<()> {
    if max_tokens == 0 {
        return Err(IndexError::InvalidInput(
            "max_tokens must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Units for code: declarations plus the non-blank text between them.
fn code_units(code: &str, language: Lang) -> Vec<Range<usize>> {
    if !language.has_structural_scanner() {
        return split_paragraphs(code, 0..code.len());
    }
    let mut units = Vec::new();
    let mut cursor = 0;
    for unit in extract_logical_units(code) {
        if unit.span.start > cursor {
            units.extend(split_paragraphs(code, cursor..unit.span.start));
        }
        cursor = unit.span.end;
        units.push(unit.span);
    }
    if cursor < code.len() {
        units.extend(split_paragraphs(code, cursor..code.len()));
    }
    units
}

/// 1-based line of each byte offset, via binary search over line starts.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    fn span_lines(&self, span: &Range<usize>) -> (usize, usize) {
        let last = span.end.saturating_sub(1).max(span.start);
        (self.line_of(span.start), self.line_of(last))
    }
}

impl Chunker {
    #[must_use]
    pub fn new(strategy: ChunkingStrategy, counter: Arc<dyn TokenCounter>) -> Self {
        Self { strategy, counter }
    }

    #[must_use]
    pub fn strategy(&self) -> &ChunkingStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    fn ensure(&self, requested: StrategyKind) -> Result<()> {
        let supported = self.strategy.kind();
        if requested == supported {
            Ok(())
        } else {
            Err(IndexError::UnsupportedStrategy {
                requested: requested.as_str(),
                supported: supported.as_str(),
            })
        }
    }

    fn to_chunks(
        &self,
        text: &str,
        spans: Vec<Range<usize>>,
        metadata: &ChunkMetadata,
    ) -> Vec<TextChunk> {
        spans
            .into_iter()
            .map(|span| {
                let content = text[span.clone()].to_string();
                TextChunk {
                    token_count: self.counter.count_tokens(&content),
                    content,
                    byte_range: span,
                    metadata: metadata.clone(),
                }
            })
            .collect()
    }

    /// Chunk `text` with this instance's strategy.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedStrategy`] when `kind` is not this
    /// instance's strategy and [`IndexError::InvalidInput`] for a zero budget.
    pub fn chunk(
        &self,
        text: &str,
        max_tokens: usize,
        kind: StrategyKind,
    ) -> Result<Vec<TextChunk>> {
        self.ensure(kind)?;
        validate_budget(max_tokens)?;
        let counter = self.counter.as_ref();
        let whole = 0..text.len();

        let chunks = match &self.strategy {
            ChunkingStrategy::Semantic => {
                let spans = pack(text, split_paragraphs(text, whole), PROSE, max_tokens, counter);
                self.to_chunks(text, spans, &ChunkMetadata {
                    strategy: kind.as_str().into(),
                    ..ChunkMetadata::default()
                })
            }
            ChunkingStrategy::CodeStructure { language } => {
                return self.chunk_code(text, max_tokens, *language);
            }
            ChunkingStrategy::Late => {
                let units = split_sentences(text, whole);
                let spans = pack(text, units, SENTENCE, max_tokens, counter);
                self.to_chunks(text, spans, &ChunkMetadata {
                    strategy: kind.as_str().into(),
                    ..ChunkMetadata::default()
                })
            }
            ChunkingStrategy::Hierarchical { levels, .. } => {
                self.chunk_sections(text, max_tokens, (*levels).max(1))
            }
        };
        tracing::debug!(
            strategy = kind.as_str(),
            chunks = chunks.len(),
            bytes = text.len(),
            "chunked text"
        );
        Ok(chunks)
    }

    /// Flat section chunks; each chunk is tagged with the header it starts
    /// under.
    fn chunk_sections(&self, text: &str, max_tokens: usize, max_depth: usize) -> Vec<TextChunk> {
        let counter = self.counter.as_ref();
        let mut chunks = Vec::new();
        for section in split_sections(text, 0..text.len(), max_depth) {
            let spans = pack(text, vec![section.span], SECTION, max_tokens, counter);
            let metadata = ChunkMetadata {
                strategy: StrategyKind::Hierarchical.as_str().into(),
                semantic_level: Some(section.depth),
                topic: section.title,
                ..ChunkMetadata::default()
            };
            chunks.extend(self.to_chunks(text, spans, &metadata));
        }
        chunks
    }

    /// Chunk source code along declaration boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedStrategy`] unless this is a
    /// code-structure chunker and [`IndexError::InvalidInput`] for a zero
    /// budget.
    pub fn chunk_code(
        &self,
        code: &str,
        max_tokens: usize,
        language: Lang,
    ) -> Result<Vec<TextChunk>> {
        self.ensure(StrategyKind::CodeStructure)?;
        validate_budget(max_tokens)?;
        let spans = pack(
            code,
            code_units(code, language),
            CODE,
            max_tokens,
            self.counter.as_ref(),
        );
        let chunks = self.to_chunks(code, spans, &ChunkMetadata {
            strategy: StrategyKind::CodeStructure.as_str().into(),
            language: Some(language),
            ..ChunkMetadata::default()
        });
        tracing::debug!(language = %language, chunks = chunks.len(), "chunked code");
        Ok(chunks)
    }

    /// Build a section tree `levels` deep with one token budget per level.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedStrategy`] unless this is a
    /// hierarchical chunker, and [`IndexError::InvalidHierarchy`] when
    /// `levels` is zero or exceeds the number of budgets.
    pub fn chunk_hierarchically(
        &self,
        text: &str,
        levels: usize,
        max_tokens_per_level: &[usize],
    ) -> Result<HierarchicalChunk> {
        self.ensure(StrategyKind::Hierarchical)?;
        if levels == 0 || levels > max_tokens_per_level.len() {
            return Err(IndexError::InvalidHierarchy {
                levels,
                budgets: max_tokens_per_level.len(),
            });
        }
        if let Some(zero) = max_tokens_per_level[..levels].iter().position(|b| *b == 0) {
            return Err(IndexError::InvalidInput(format!(
                "level {zero} has a zero token budget"
            )));
        }
        Ok(hierarchy::build(
            text,
            levels,
            max_tokens_per_level,
            self.counter.as_ref(),
        ))
    }

    /// Chunk a source file for indexing. Language is detected from
    /// `file_path`; every chunk carries the file's imports and the names of
    /// symbols declared inside it.
    ///
    /// Available on every instance: files are always split along their own
    /// structure.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] for a zero budget.
    pub fn parse_source(
        &self,
        code: &str,
        file_path: &str,
        max_tokens: usize,
    ) -> Result<Vec<ParsedChunk>> {
        validate_budget(max_tokens)?;
        let path = Path::new(file_path);
        let language = detect_language(path).unwrap_or(Lang::Text);
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let imports = extract_imports(code, ext);
        let symbols = extract_symbols(code, language);
        let lines = LineIndex::new(code);

        let spans = pack(
            code,
            code_units(code, language),
            CODE,
            max_tokens,
            self.counter.as_ref(),
        );

        let chunks = spans
            .into_iter()
            .map(|span| {
                let (start_line, end_line) = lines.span_lines(&span);
                let contained: Vec<&Symbol> = symbols
                    .iter()
                    .filter(|s| s.start_line >= start_line && s.start_line <= end_line)
                    .collect();
                let chunk_type = match contained.first() {
                    Some(symbol) => symbol.kind.as_str().to_string(),
                    None if language.has_structural_scanner() => "code".to_string(),
                    None => "text".to_string(),
                };
                let content = code[span].to_string();
                ParsedChunk {
                    token_count: self.counter.count_tokens(&content),
                    content,
                    start_line,
                    end_line,
                    chunk_type,
                    symbols: contained.iter().map(|s| s.name.clone()).collect(),
                    imports: imports.clone(),
                }
            })
            .collect();
        Ok(chunks)
    }
}
