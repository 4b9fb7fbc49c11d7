//! Context compression: reversible pattern substitution and lossy truncation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::tokens::TokenCounter;

const MIN_NGRAM: usize = 3;
const MAX_NGRAM: usize = 5;
const MIN_OCCURRENCES: usize = 2;
const MAX_PATTERNS: usize = 20;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionTechnique {
    PatternSubstitution,
    Truncation,
}

impl CompressionTechnique {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PatternSubstitution => "pattern_substitution",
            Self::Truncation => "truncation",
        }
    }
}

impl std::fmt::Display for CompressionTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compressed text plus whatever the technique needs to undo it.
///
/// Lengths are measured in chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedContext {
    pub content: String,
    pub technique: CompressionTechnique,
    pub original_length: usize,
    pub compressed_length: usize,
    /// Placeholder to pattern mapping for pattern substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl CompressedContext {
    /// `compressed_length / original_length`; 1.0 for empty input.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.original_length == 0 {
            1.0
        } else {
            self.compressed_length as f64 / self.original_length as f64
        }
    }
}

pub trait ContextCompressor: Send + Sync {
    fn technique(&self) -> CompressionTechnique;

    /// Compress `text` towards `target_ratio` of its original length.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] when `target_ratio` is outside `(0, 1]`.
    fn compress(&self, text: &str, target_ratio: f64) -> Result<CompressedContext>;

    /// # Errors
    ///
    /// Returns [`IndexError::IncompatibleTechnique`] when `compressed` came from
    /// another technique, or [`IndexError::MissingMetadata`] when the data
    /// needed to reverse it is absent.
    fn decompress(&self, compressed: &CompressedContext) -> Result<String>;
}

fn check_ratio(target_ratio: f64) -> Result<()> {
    if target_ratio > 0.0 && target_ratio <= 1.0 {
        Ok(())
    } else {
        Err(IndexError::InvalidInput(format!(
            "target_ratio must be in (0, 1], got {target_ratio}"
        )))
    }
}

fn check_technique(expected: CompressionTechnique, found: CompressionTechnique) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(IndexError::IncompatibleTechnique {
            expected: expected.as_str(),
            found: found.as_str(),
        })
    }
}

fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}")
}

/// Word n-grams (3 to 5 words) seen at least twice, most frequent first,
/// ties broken by longer pattern then lexicographic order.
#[must_use]
pub fn repeated_patterns(text: &str) -> Vec<(String, usize)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for n in MIN_NGRAM..=MAX_NGRAM {
        for window in words.windows(n) {
            *counts.entry(window.join(" ")).or_default() += 1;
        }
    }
    let mut patterns: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= MIN_OCCURRENCES)
        .collect();
    patterns.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.0.len().cmp(&a.0.len()))
            .then_with(|| a.0.cmp(&b.0))
    });
    patterns.truncate(MAX_PATTERNS);
    patterns
}

/// Replaces frequent word sequences with private-use placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternCompressor;

impl ContextCompressor for PatternCompressor {
    fn technique(&self) -> CompressionTechnique {
        CompressionTechnique::PatternSubstitution
    }

    fn compress(&self, text: &str, target_ratio: f64) -> Result<CompressedContext> {
        check_ratio(target_ratio)?;
        let original_length = text.chars().count();
        let mut content = text.to_string();
        let mut mapping = BTreeMap::new();

        // Placeholders would be ambiguous on the way back.
        if text.contains([PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE]) {
            tracing::debug!("text already contains placeholder chars, skipping substitution");
        } else {
            let mut patterns = repeated_patterns(text);
            patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

            #[allow(clippy::cast_precision_loss)]
            let target_len = (original_length as f64 * target_ratio).floor();
            for (pattern, _) in patterns {
                #[allow(clippy::cast_precision_loss)]
                if (content.chars().count() as f64) <= target_len {
                    break;
                }
                if !content.contains(&pattern) {
                    continue;
                }
                let key = placeholder(mapping.len());
                content = content.replace(&pattern, &key);
                mapping.insert(key, pattern);
            }
        }

        let compressed_length = content.chars().count();
        tracing::debug!(
            original_length,
            compressed_length,
            patterns = mapping.len(),
            "pattern compression"
        );
        Ok(CompressedContext {
            content,
            technique: self.technique(),
            original_length,
            compressed_length,
            metadata: Some(mapping),
        })
    }

    fn decompress(&self, compressed: &CompressedContext) -> Result<String> {
        check_technique(self.technique(), compressed.technique)?;
        let mapping = compressed
            .metadata
            .as_ref()
            .ok_or(IndexError::MissingMetadata("pattern mapping"))?;
        let mut keys: Vec<&String> = mapping.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let mut text = compressed.content.clone();
        for key in keys {
            text = text.replace(key.as_str(), &mapping[key]);
        }
        Ok(text)
    }
}

/// Keeps the leading share of the token budget. Not reversible.
#[derive(Clone)]
pub struct TruncationCompressor {
    counter: Arc<dyn TokenCounter>,
}

impl TruncationCompressor {
    #[must_use]
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }
}

impl std::fmt::Debug for TruncationCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TruncationCompressor").finish_non_exhaustive()
    }
}

impl ContextCompressor for TruncationCompressor {
    fn technique(&self) -> CompressionTechnique {
        CompressionTechnique::Truncation
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn compress(&self, text: &str, target_ratio: f64) -> Result<CompressedContext> {
        check_ratio(target_ratio)?;
        let tokens = self.counter.count_tokens(text);
        let budget = ((tokens as f64 * target_ratio).ceil() as usize).max(1);
        let content = self.counter.truncate(text, budget)?;
        Ok(CompressedContext {
            original_length: text.chars().count(),
            compressed_length: content.chars().count(),
            content,
            technique: self.technique(),
            metadata: None,
        })
    }

    fn decompress(&self, compressed: &CompressedContext) -> Result<String> {
        check_technique(self.technique(), compressed.technique)?;
        Ok(compressed.content.clone())
    }
}
