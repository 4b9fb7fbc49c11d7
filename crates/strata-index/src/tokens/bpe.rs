//! Byte-pair estimator: GPT-style pre-tokenization followed by either a
//! byte-length heuristic per piece or real merge rules from a vocabulary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::TokenCounter;
use super::heuristic::{digit_tokens, punct_tokens, whitespace_tokens, word_tokens};
use super::profile::TokenizerProfile;
use crate::error::{IndexError, Result};

static PRE_TOKENIZER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}{1,3}| ?[^\s\p{L}\p{N}]+|\s+")
        .expect("pre-tokenizer pattern is valid")
});

/// Split text into the pieces a byte-level BPE tokenizer encodes
/// independently.
pub fn pre_tokenize(text: &str) -> impl Iterator<Item = &str> {
    PRE_TOKENIZER.find_iter(text).map(|m| m.as_str())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MergeRule {
    Pair([String; 2]),
    Joined(String),
}

#[derive(Deserialize)]
struct VocabularyFile {
    vocab: HashMap<String, u32>,
    #[serde(default)]
    merges: Vec<MergeRule>,
}

fn is_contraction(piece: &str) -> bool {
    piece.len() <= 3
        && piece
            .strip_prefix('\'')
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic()))
}

/// Token vocabulary with ranked merge rules.
///
/// Merges operate on characters rather than the byte-level alphabet, so the
/// vocabulary must spell spaces literally.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    ranks: HashMap<(String, String), usize>,
}

impl Vocabulary {
    /// Parse a `{"vocab": {...}, "merges": [...]}` document. Merges may be
    /// `"a b"` strings or `["a", "b"]` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a merge rule cannot be split.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: VocabularyFile = serde_json::from_str(json)?;
        let mut ranks = HashMap::with_capacity(file.merges.len());
        for (rank, rule) in file.merges.into_iter().enumerate() {
            let pair = match rule {
                MergeRule::Pair([a, b]) => (a, b),
                MergeRule::Joined(s) => {
                    let (a, b) = s.split_once(' ').ok_or_else(|| {
                        IndexError::Vocabulary(format!("merge rule {rank} has no separator: {s:?}"))
                    })?;
                    (a.to_string(), b.to_string())
                }
            };
            ranks.entry(pair).or_insert(rank);
        }
        let id_to_token = file
            .vocab
            .iter()
            .map(|(token, id)| (*id, token.clone()))
            .collect();
        Ok(Self {
            token_to_id: file.vocab,
            id_to_token,
            ranks,
        })
    }

    /// Load a vocabulary file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Apply merge rules to one pre-tokenized piece.
    fn merge_piece(&self, piece: &str) -> Vec<String> {
        let mut symbols: Vec<String> = piece.chars().map(String::from).collect();
        loop {
            let best = symbols
                .windows(2)
                .enumerate()
                .filter_map(|(i, w)| {
                    self.ranks
                        .get(&(w[0].clone(), w[1].clone()))
                        .map(|rank| (*rank, i))
                })
                .min();
            let Some((_, i)) = best else {
                break;
            };
            let right = symbols.remove(i + 1);
            symbols[i].push_str(&right);
        }
        symbols
    }
}

/// Byte-pair-encoding estimator.
#[derive(Debug, Clone, Default)]
pub struct BpeEstimator {
    profile: TokenizerProfile,
    vocabulary: Option<Vocabulary>,
}

impl BpeEstimator {
    #[must_use]
    pub fn new(profile: TokenizerProfile) -> Self {
        Self {
            profile,
            vocabulary: None,
        }
    }

    #[must_use]
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }

    #[must_use]
    pub fn profile(&self) -> &TokenizerProfile {
        &self.profile
    }

    #[must_use]
    pub fn has_vocabulary(&self) -> bool {
        self.vocabulary.is_some()
    }

    /// Score one pre-tokenized piece with the heuristic estimator's
    /// per-class rules. A single leading space is absorbed into the piece.
    fn estimate_piece(&self, piece: &str) -> usize {
        if piece.chars().all(char::is_whitespace) {
            return whitespace_tokens(piece.chars().count());
        }
        let body = piece.strip_prefix(' ').unwrap_or(piece);
        if is_contraction(body) {
            1
        } else if body.chars().all(char::is_numeric) {
            digit_tokens(&self.profile, body.chars().count())
        } else if body.chars().all(char::is_alphabetic) {
            word_tokens(&self.profile, body)
        } else {
            punct_tokens(body.chars().count())
        }
    }

    fn vocabulary(&self) -> Result<&Vocabulary> {
        self.vocabulary.as_ref().ok_or_else(|| {
            IndexError::DecodingUnavailable(format!(
                "{} estimator has no vocabulary loaded; token ids cannot be produced from an estimate",
                self.profile.name
            ))
        })
    }

    /// Encode text into token ids.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DecodingUnavailable`] without a vocabulary and
    /// [`IndexError::Vocabulary`] when a merged symbol is not in it.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let vocab = self.vocabulary()?;
        let mut ids = Vec::new();
        for piece in pre_tokenize(text) {
            for symbol in vocab.merge_piece(piece) {
                let id = vocab.token_to_id.get(&symbol).ok_or_else(|| {
                    IndexError::Vocabulary(format!("symbol {symbol:?} not in vocabulary"))
                })?;
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    /// Decode token ids back into text.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DecodingUnavailable`] without a vocabulary and
    /// [`IndexError::Vocabulary`] for unknown ids.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self.vocabulary()?;
        ids.iter()
            .map(|id| {
                vocab
                    .id_to_token
                    .get(id)
                    .map(String::as_str)
                    .ok_or_else(|| IndexError::Vocabulary(format!("unknown token id {id}")))
            })
            .collect()
    }
}

impl TokenCounter for BpeEstimator {
    fn count_tokens(&self, text: &str) -> usize {
        match &self.vocabulary {
            Some(vocab) => pre_tokenize(text)
                .map(|piece| vocab.merge_piece(piece).len())
                .sum(),
            None => pre_tokenize(text).map(|p| self.estimate_piece(p)).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenizerProvider;

    const VOCAB: &str = r#"{
        "vocab": {"h": 0, "e": 1, "l": 2, "o": 3, " ": 4, "he": 5, "ll": 6, "hell": 7, "hello": 8, " hello": 9},
        "merges": ["h e", "l l", "he ll", "hell o", [" ", "hello"]]
    }"#;

    fn openai() -> BpeEstimator {
        BpeEstimator::new(TokenizerProfile::for_provider(TokenizerProvider::OpenAi))
    }

    #[test]
    fn pre_tokenizer_splits_contractions_and_digits() {
        let pieces: Vec<_> = pre_tokenize("I'm 12345 done!").collect();
        assert_eq!(pieces, vec!["I", "'m", " 123", "45", " done", "!"]);
    }

    #[test]
    fn estimate_without_vocabulary() {
        let est = openai();
        assert_eq!(est.count_tokens(""), 0);
        // "hello" is 5 bytes: 1 + ceil(1/4); " world" likewise
        assert_eq!(est.count_tokens("hello world"), 4);
        assert_eq!(est.count_tokens("I'm"), 2);
    }

    #[test]
    fn long_words_and_punctuation_match_heuristic() {
        use crate::tokens::heuristic::HeuristicEstimator;

        let bpe = openai();
        let heuristic =
            HeuristicEstimator::new(TokenizerProfile::for_provider(TokenizerProvider::OpenAi));
        let t = bpe.profile().word_threshold;
        let expected = 1 + (20 - t).div_ceil(t);
        assert_eq!(expected, 5);
        for est in [&bpe as &dyn TokenCounter, &heuristic] {
            assert_eq!(est.count_tokens("internationalization"), expected);
            assert_eq!(est.count_tokens("!!!!"), 4);
        }
    }

    #[test]
    fn encode_requires_vocabulary() {
        let err = openai().encode("hi").unwrap_err();
        assert!(matches!(err, IndexError::DecodingUnavailable(_)));
        assert!(err.to_string().contains("no vocabulary"));
        assert!(matches!(
            openai().decode(&[1, 2]),
            Err(IndexError::DecodingUnavailable(_))
        ));
    }

    #[test]
    fn merges_applied_by_rank() {
        let vocab = Vocabulary::from_json(VOCAB).unwrap();
        assert_eq!(vocab.len(), 10);
        let est = openai().with_vocabulary(vocab);
        assert_eq!(est.encode("hello").unwrap(), vec![8]);
        assert_eq!(est.encode("hello hello").unwrap(), vec![8, 9]);
        assert_eq!(est.count_tokens("hello hello"), 2);
    }

    #[test]
    fn decode_inverts_encode() {
        let est = openai().with_vocabulary(Vocabulary::from_json(VOCAB).unwrap());
        let ids = est.encode("hello hello").unwrap();
        assert_eq!(est.decode(&ids).unwrap(), "hello hello");
    }

    #[test]
    fn unknown_symbols_and_ids_rejected() {
        let est = openai().with_vocabulary(Vocabulary::from_json(VOCAB).unwrap());
        assert!(matches!(est.encode("xyz"), Err(IndexError::Vocabulary(_))));
        assert!(matches!(est.decode(&[99]), Err(IndexError::Vocabulary(_))));
    }

    #[test]
    fn malformed_merge_rejected() {
        let json = r#"{"vocab": {"a": 0}, "merges": ["ab"]}"#;
        assert!(matches!(
            Vocabulary::from_json(json),
            Err(IndexError::Vocabulary(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, VOCAB).unwrap();
        let vocab = Vocabulary::load(&path).unwrap();
        assert!(!vocab.is_empty());
    }
}
