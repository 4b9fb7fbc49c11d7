//! Embedding and text-generation capabilities for the Strata pipeline.
//!
//! The indexing pipeline never talks to a model directly. It consumes the
//! [`Embedder`] and [`TextGenerator`] traits; this crate supplies an Ollama
//! backend, an offline hashing embedder and an enum dispatcher over both.

pub mod any;
pub mod error;
pub mod hashing;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::LlmError;
pub use provider::{Embedder, TextGenerator};
