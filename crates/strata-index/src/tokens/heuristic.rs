use super::TokenCounter;
use super::profile::{PreTokenizer, TokenizerProfile};

/// Whitespace runs longer than this are collapsed by real tokenizers.
const WHITESPACE_RUN_CAP: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Whitespace,
    Digit,
    Word,
    Punct,
}

fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Whitespace
    } else if c.is_ascii_digit() {
        CharClass::Digit
    } else if c.is_alphanumeric() || c == '_' {
        CharClass::Word
    } else {
        CharClass::Punct
    }
}

/// Character-class token estimator calibrated by a [`TokenizerProfile`].
#[derive(Debug, Clone, Default)]
pub struct HeuristicEstimator {
    profile: TokenizerProfile,
}

impl HeuristicEstimator {
    #[must_use]
    pub fn new(profile: TokenizerProfile) -> Self {
        Self { profile }
    }

    #[must_use]
    pub fn profile(&self) -> &TokenizerProfile {
        &self.profile
    }
}

/// Whitespace: one token per char, long runs collapsed.
pub(super) fn whitespace_tokens(run: usize) -> usize {
    if run <= WHITESPACE_RUN_CAP {
        run
    } else {
        WHITESPACE_RUN_CAP + (run - WHITESPACE_RUN_CAP).div_ceil(WHITESPACE_RUN_CAP * 2)
    }
}

/// Digits group by three, except SentencePiece which splits every digit.
pub(super) fn digit_tokens(profile: &TokenizerProfile, run: usize) -> usize {
    match profile.pre_tokenizer {
        PreTokenizer::SentencePiece => run,
        _ => run.div_ceil(3),
    }
}

/// Punctuation and symbols: one token per char.
pub(super) fn punct_tokens(run: usize) -> usize {
    run
}

/// One token up to `word_threshold` bytes, then one more per further
/// `word_threshold` bytes. Non-ASCII words go by the byte ratio.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(super) fn word_tokens(profile: &TokenizerProfile, word: &str) -> usize {
    let bytes = word.len();
    if !word.is_ascii() {
        let estimate = (bytes as f64 * 2.0 / profile.bytes_per_token).ceil() as usize;
        return estimate.max(1);
    }
    let threshold = profile.word_threshold.max(1);
    if bytes <= threshold {
        1
    } else {
        1 + (bytes - threshold).div_ceil(threshold)
    }
}

impl TokenCounter for HeuristicEstimator {
    fn count_tokens(&self, text: &str) -> usize {
        let mut total = 0;
        let mut chars = text.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            let class = classify(c);
            let mut end = start + c.len_utf8();
            let mut run = 1;
            if class != CharClass::Punct {
                while let Some(&(i, next)) = chars.peek() {
                    if classify(next) != class {
                        break;
                    }
                    end = i + next.len_utf8();
                    run += 1;
                    chars.next();
                }
            }
            total += match class {
                CharClass::Whitespace => whitespace_tokens(run),
                CharClass::Digit => digit_tokens(&self.profile, run),
                CharClass::Word => word_tokens(&self.profile, &text[start..end]),
                CharClass::Punct => punct_tokens(1),
            };
        }
        total
    }
}
