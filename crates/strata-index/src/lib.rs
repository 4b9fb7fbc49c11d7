//! Codebase indexing and hybrid retrieval.
//!
//! Source files are segmented into logical units, packed into token-bounded
//! chunks, fingerprinted in an integrity tree, optionally enriched with a
//! generated summary, embedded and stored behind [`store::ChunkRepository`].
//! Queries run through a cached hybrid (vector + BM25) retriever and can be
//! widened with neighbouring chunks by the [`expander::ContextExpander`].

pub mod cache;
pub mod chunker;
pub mod compress;
pub mod context;
pub mod enrich;
pub mod error;
pub mod expander;
pub mod indexer;
pub mod integrity;
pub mod languages;
pub mod metrics;
pub mod retriever;
pub mod segmenter;
pub mod store;
pub mod tokens;

pub use error::{IndexError, Result};
