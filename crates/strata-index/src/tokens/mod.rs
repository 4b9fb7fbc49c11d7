//! Token estimation without vendor tokenizer vocabularies.
//!
//! Estimates are calibrated per provider through a [`TokenizerProfile`]. They
//! are deliberately conservative: budgets computed here should hold against
//! the real tokenizer for ordinary prose and code.

mod bpe;
mod heuristic;
mod profile;

pub use bpe::{BpeEstimator, Vocabulary, pre_tokenize};
pub use heuristic::HeuristicEstimator;
pub use profile::{PreTokenizer, TokenizerProfile, TokenizerProvider};

use crate::error::{IndexError, Result};

/// Counts tokens and truncates text to a token budget.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Longest prefix of `text` within `max_tokens`, cut at a word boundary
    /// when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] when `max_tokens` is zero.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        truncate_to_budget(self, text, max_tokens)
    }
}

/// Binary search over char-boundary prefixes, then back off to the
/// preceding whitespace if that still fits.
///
/// Text that already fits is returned unchanged, which makes truncation
/// idempotent.
///
/// # Errors
///
/// Returns [`IndexError::InvalidInput`] when `max_tokens` is zero.
pub fn truncate_to_budget<C: TokenCounter + ?Sized>(
    counter: &C,
    text: &str,
    max_tokens: usize,
) -> Result<String> {
    if max_tokens == 0 {
        return Err(IndexError::InvalidInput(
            "max_tokens must be greater than zero".into(),
        ));
    }
    if text.is_empty() || counter.count_tokens(text) <= max_tokens {
        return Ok(text.to_string());
    }

    // boundaries[k] is the byte offset after k chars
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let fits = |k: usize| counter.count_tokens(&text[..boundaries[k]]) <= max_tokens;

    let (mut lo, mut hi) = (0, boundaries.len() - 1);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let end = boundaries[lo];
    let prefix = &text[..end];
    let at_word_boundary = text[end..].starts_with(char::is_whitespace)
        || prefix.ends_with(char::is_whitespace);
    if !at_word_boundary
        && let Some(ws) = prefix.rfind(char::is_whitespace)
    {
        let backed = prefix[..ws].trim_end();
        if !backed.is_empty() && counter.count_tokens(backed) <= max_tokens {
            return Ok(backed.to_string());
        }
    }
    Ok(prefix.trim_end().to_string())
}

/// Estimator selected for a provider: byte-level providers get the BPE
/// estimator, the rest the character-class heuristic.
#[derive(Debug, Clone)]
pub enum Estimator {
    Heuristic(HeuristicEstimator),
    Bpe(BpeEstimator),
}

impl Estimator {
    #[must_use]
    pub fn profile_name(&self) -> &str {
        match self {
            Self::Heuristic(e) => &e.profile().name,
            Self::Bpe(e) => &e.profile().name,
        }
    }
}

impl TokenCounter for Estimator {
    fn count_tokens(&self, text: &str) -> usize {
        match self {
            Self::Heuristic(e) => e.count_tokens(text),
            Self::Bpe(e) => e.count_tokens(text),
        }
    }
}

/// Build the estimator matching `provider`'s tokenizer family.
#[must_use]
pub fn estimator_for(provider: TokenizerProvider) -> Estimator {
    let profile = TokenizerProfile::for_provider(provider);
    match profile.pre_tokenizer {
        PreTokenizer::ByteLevel => Estimator::Bpe(BpeEstimator::new(profile)),
        PreTokenizer::Heuristic | PreTokenizer::SentencePiece => {
            Estimator::Heuristic(HeuristicEstimator::new(profile))
        }
    }
}
