use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::pack::{PROSE, pack};
use crate::segmenter::{split_paragraphs, split_sections};
use crate::tokens::TokenCounter;

/// Node of a section tree. Level 0 is the whole document; leaves have no
/// children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalChunk {
    pub content: String,
    pub level: usize,
    pub token_count: usize,
    pub title: Option<String>,
    pub byte_range: Range<usize>,
    pub children: Vec<HierarchicalChunk>,
}

impl HierarchicalChunk {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Leaves in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&HierarchicalChunk> {
        if self.is_leaf() {
            return vec![self];
        }
        self.children.iter().flat_map(Self::leaves).collect()
    }

    /// Number of levels below and including this node.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

struct Builder<'a> {
    source: &'a str,
    levels: usize,
    budgets: &'a [usize],
    counter: &'a dyn TokenCounter,
}

impl Builder<'_> {
    fn node(&self, span: Range<usize>, level: usize, title: Option<String>) -> HierarchicalChunk {
        let content = self.source[span.clone()].to_string();
        let token_count = self.counter.count_tokens(&content);
        let mut node = HierarchicalChunk {
            content,
            level,
            token_count,
            title,
            byte_range: span.clone(),
            children: Vec::new(),
        };
        if level + 1 >= self.levels || token_count <= self.budgets[level] {
            return node;
        }

        let child_level = level + 1;
        let sections = split_sections(self.source, span.clone(), child_level);
        let children: Vec<(Range<usize>, Option<String>)> = if sections.len() > 1 {
            sections.into_iter().map(|s| (s.span, s.title)).collect()
        } else {
            let units = split_paragraphs(self.source, span);
            pack(
                self.source,
                units,
                PROSE,
                self.budgets[child_level],
                self.counter,
            )
            .into_iter()
            .map(|r| (r, None))
            .collect()
        };
        if children.len() <= 1 {
            return node;
        }
        node.children = children
            .into_iter()
            .map(|(r, t)| self.node(r, child_level, t))
            .collect();
        node
    }
}

/// Build the section tree. Callers validate `levels` against `budgets`.
pub(super) fn build(
    source: &str,
    levels: usize,
    budgets: &[usize],
    counter: &dyn TokenCounter,
) -> HierarchicalChunk {
    let builder = Builder {
        source,
        levels,
        budgets,
        counter,
    };
    let root = builder.node(0..source.len(), 0, None);
    tracing::debug!(
        levels,
        nodes = root.node_count(),
        leaves = root.leaves().len(),
        "built section hierarchy"
    );
    root
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chunker::{Chunker, ChunkingStrategy};
    use crate::tokens::HeuristicEstimator;

    const DOC: &str = "# Guide\nIntro paragraph for the guide.\n\n\
        ## Install\nRun the installer and wait for it.\n\n\
        ## Usage\nCall the binary with a path argument.\n\n\
        # Reference\nFlags are listed below in detail.\n";

    fn chunker() -> Chunker {
        Chunker::new(
            ChunkingStrategy::Hierarchical {
                levels: 3,
                max_tokens_per_level: vec![20, 20, 20],
            },
            Arc::new(HeuristicEstimator::default()),
        )
    }

    #[test]
    fn single_level_is_whole_document_leaf() {
        let root = chunker().chunk_hierarchically(DOC, 1, &[5]).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.content, DOC);
        assert_eq!(root.level, 0);
    }

    #[test]
    fn sections_become_children() {
        let root = chunker().chunk_hierarchically(DOC, 3, &[20, 20, 20]).unwrap();
        let titles: Vec<_> = root.children.iter().map(|c| c.title.clone()).collect();
        assert_eq!(
            titles,
            vec![Some("Guide".to_string()), Some("Reference".to_string())]
        );
        let guide = &root.children[0];
        assert_eq!(guide.level, 1);
        assert!(guide.children.iter().any(|c| c.title.as_deref() == Some("Install")));
        assert!(root.depth() <= 3);
    }

    #[test]
    fn fitting_document_is_not_split() {
        let root = chunker()
            .chunk_hierarchically("short text", 3, &[100, 50, 10])
            .unwrap();
        assert!(root.is_leaf());
    }

    #[test]
    fn headerless_text_splits_by_paragraph() {
        let text = "First paragraph with words.\n\nSecond paragraph with words.";
        let root = chunker().chunk_hierarchically(text, 2, &[5, 20]).unwrap();
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(HierarchicalChunk::is_leaf));
    }

    #[test]
    fn leaves_cover_document_in_order() {
        let root = chunker().chunk_hierarchically(DOC, 3, &[20, 20, 20]).unwrap();
        let leaves = root.leaves();
        for pair in leaves.windows(2) {
            assert!(pair[0].byte_range.end <= pair[1].byte_range.start);
        }
        assert!(leaves.iter().all(|l| DOC[l.byte_range.clone()] == l.content));
        assert!(leaves.len() < root.node_count());
    }
}
