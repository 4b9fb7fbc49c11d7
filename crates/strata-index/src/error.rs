//! Error types for strata-index.

/// Errors that can occur while chunking, compressing, enriching or indexing.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A chunker instance was asked for a strategy it was not built for.
    #[error("strategy not supported: {requested} (this chunker handles {supported})")]
    UnsupportedStrategy {
        requested: &'static str,
        supported: &'static str,
    },

    /// A compressed context was produced by a different technique.
    #[error("incompatible technique: expected {expected}, found {found}")]
    IncompatibleTechnique {
        expected: &'static str,
        found: &'static str,
    },

    /// Caller-supplied argument outside its valid domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Hierarchy levels do not match the per-level budget list.
    #[error("invalid hierarchy: {levels} levels with {budgets} level budgets")]
    InvalidHierarchy { levels: usize, budgets: usize },

    /// Decompression without the stored substitution mapping.
    #[error("missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// Token ids cannot be produced or inverted without a loaded vocabulary.
    #[error("decoding unavailable: {0}")]
    DecodingUnavailable(String),

    /// Vocabulary file is malformed or references unknown tokens.
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// Embedding or generation backend error.
    #[error("LLM error: {0}")]
    Llm(#[from] strata_llm::LlmError),

    /// Chunk repository error.
    #[error("repository error: {0}")]
    Repository(String),

    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
