//! Greedy token-bounded packing shared by every chunking strategy.

use std::ops::Range;

use crate::segmenter::{split_lines, split_paragraphs, split_sentences, split_words};
use crate::tokens::TokenCounter;

/// Splits a byte span of the source into finer, ordered, non-overlapping spans.
pub(crate) type Splitter = fn(&str, Range<usize>) -> Vec<Range<usize>>;

pub(crate) const PROSE: &[Splitter] = &[split_sentences, split_words];
/// Sentences are atomic: an oversized one is emitted whole.
pub(crate) const SENTENCE: &[Splitter] = &[];
pub(crate) const CODE: &[Splitter] = &[split_lines, split_words];
pub(crate) const SECTION: &[Splitter] = &[split_paragraphs, split_sentences, split_words];

/// Pack ordered units into spans whose token count stays within `max_tokens`.
///
/// Adjacent units merge while the source slice covering them fits. A unit
/// that alone exceeds the budget is re-split with the first of `finer` and
/// packed recursively with the rest; once no finer splitter remains it is
/// emitted as-is.
pub(crate) fn pack(
    source: &str,
    units: Vec<Range<usize>>,
    finer: &[Splitter],
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in units {
        if counter.count_tokens(&source[unit.clone()]) > max_tokens {
            chunks.extend(current.take());
            match finer.split_first() {
                Some((split, rest)) => {
                    let mut pieces = split(source, unit.clone());
                    if pieces.is_empty() || (pieces.len() == 1 && pieces[0] == unit) {
                        pieces = vec![unit];
                    }
                    chunks.extend(pack(source, pieces, rest, max_tokens, counter));
                }
                None => chunks.push(unit),
            }
            continue;
        }

        current = Some(match current.take() {
            None => unit,
            Some(cur) => {
                let merged = cur.start..unit.end;
                if counter.count_tokens(&source[merged.clone()]) <= max_tokens {
                    merged
                } else {
                    chunks.push(cur);
                    unit
                }
            }
        });
    }
    chunks.extend(current);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicEstimator;

    fn spans(text: &str, out: &[Range<usize>]) -> Vec<String> {
        out.iter().map(|r| text[r.clone()].to_string()).collect()
    }

    #[test]
    fn merges_small_units() {
        let text = "one\n\ntwo\n\nthree";
        let est = HeuristicEstimator::default();
        let units = split_paragraphs(text, 0..text.len());
        let out = pack(text, units, PROSE, 100, &est);
        assert_eq!(spans(text, &out), vec![text]);
    }

    #[test]
    fn flushes_when_budget_exceeded() {
        let text = "aa bb\n\ncc dd\n\nee ff";
        let est = HeuristicEstimator::default();
        let units = split_paragraphs(text, 0..text.len());
        // each paragraph is 3 tokens, paragraph + "\n\n" + paragraph is 8
        let out = pack(text, units, PROSE, 4, &est);
        assert_eq!(spans(text, &out), vec!["aa bb", "cc dd", "ee ff"]);
    }

    #[test]
    fn oversized_unit_split_finer() {
        let text = "One two three. Four five six. Seven eight nine.";
        let est = HeuristicEstimator::default();
        let out = pack(text, vec![0..text.len()], PROSE, 7, &est);
        assert!(out.len() > 1);
        for r in &out {
            assert!(est.count_tokens(&text[r.clone()]) <= 7);
        }
    }

    #[test]
    fn single_oversized_word_emitted_whole() {
        let text = "supercalifragilisticexpialidocious";
        let est = HeuristicEstimator::default();
        let out = pack(text, vec![0..text.len()], SENTENCE, 2, &est);
        assert_eq!(out, vec![0..text.len()]);
    }

    #[test]
    fn output_ranges_monotonic() {
        let text = "word ".repeat(200);
        let est = HeuristicEstimator::default();
        let out = pack(&text, vec![0..text.len()], PROSE, 10, &est);
        for pair in out.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
