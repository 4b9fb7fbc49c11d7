//! Offline feature-hashing embedder.
//!
//! Projects term frequencies into a fixed number of buckets with FNV-1a and
//! L2-normalizes the result. Far weaker than a neural model but deterministic
//! and always available, which makes it the default for local runs and tests.

use std::collections::HashMap;

use crate::error::LlmError;
use crate::provider::Embedder;

pub const DEFAULT_DIMENSIONS: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Compute the embedding synchronously.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let terms = terms(text);
        let mut vec = vec![0.0f32; self.dimensions];
        if terms.is_empty() {
            return vec;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            *tf.entry(term.as_str()).or_default() += 1.0;
        }

        let total = terms.len() as f32;
        for (term, count) in tf {
            let idf = 1.0 + (term.len() as f32).ln();
            vec[bucket(term, self.dimensions)] += count / total * idf;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "hashing"
    }
}

/// Lowercased alphanumeric terms; identifiers are also split on `_` and
/// camel-case humps so `parseConfig` matches a query for "parse config".
#[must_use]
pub fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.len() < 2 {
            continue;
        }
        out.push(word.to_lowercase());
        let parts = split_identifier(word);
        if parts.len() > 1 {
            out.extend(parts.into_iter().filter(|p| p.len() >= 2));
        }
    }
    out
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in word.chars() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[allow(clippy::cast_possible_truncation)]
fn bucket(term: &str, dims: usize) -> usize {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in term.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    (h % dims as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_has_requested_dimensions() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.vector("hello world").len(), 64);
    }

    #[test]
    fn vector_is_normalized() {
        let v = HashingEmbedder::default().vector("fn parse_config(path: &Path)");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let v = HashingEmbedder::default().vector("  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn deterministic() {
        let e = HashingEmbedder::default();
        assert_eq!(e.vector("struct Cache"), e.vector("struct Cache"));
    }

    #[test]
    fn identifiers_split_into_parts() {
        assert_eq!(split_identifier("parseConfig"), vec!["parse", "config"]);
        assert_eq!(split_identifier("read_file_v2"), vec!["read", "file", "v2"]);
        assert_eq!(split_identifier("plain"), vec!["plain"]);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let e = HashingEmbedder::new(32);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out[0], e.vector("alpha beta"));
        assert_eq!(out[1], e.vector("gamma delta"));
    }

    mod proptest_hashing {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn vector_is_unit_or_zero(text in "\\PC{0,300}", dims in 1usize..512) {
                let v = HashingEmbedder::new(dims).vector(&text);
                prop_assert_eq!(v.len(), dims);
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-3);
            }

            #[test]
            fn terms_are_lowercase(text in "[A-Za-z_ ]{0,200}") {
                for term in terms(&text) {
                    prop_assert!(term.len() >= 2);
                    prop_assert_eq!(term.to_lowercase(), term);
                }
            }
        }
    }
}
