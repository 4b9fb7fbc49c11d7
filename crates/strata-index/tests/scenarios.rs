use std::sync::Arc;
use std::time::Duration;

use strata_index::cache::{CacheKey, RetrievalCache};
use strata_index::chunker::{Chunker, ChunkingStrategy, StrategyKind};
use strata_index::integrity::{self, IntegrityLeaf, IntegrityNode, hash_pair};
use strata_index::tokens::{HeuristicEstimator, TokenCounter};

fn semantic_chunker() -> (Chunker, Arc<HeuristicEstimator>) {
    let counter = Arc::new(HeuristicEstimator::default());
    let chunker = Chunker::new(
        ChunkingStrategy::Semantic,
        Arc::clone(&counter) as Arc<dyn TokenCounter>,
    );
    (chunker, counter)
}

#[test]
fn small_paragraphs_share_one_chunk() {
    let (chunker, _) = semantic_chunker();
    let chunks = chunker
        .chunk("A.\n\nB.", 100, StrategyKind::Semantic)
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "A.\n\nB.");
    assert_eq!(chunks[0].metadata.strategy, "semantic");
}

#[test]
fn long_paragraph_is_split_in_order() {
    let (chunker, counter) = semantic_chunker();
    // 250 one-token words, 249 separating spaces and a full stop
    let text = format!("{}.", vec!["word"; 250].join(" "));
    assert_eq!(counter.count_tokens(&text), 500);

    let chunks = chunker.chunk(&text, 100, StrategyKind::Semantic).unwrap();
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.token_count <= 100, "chunk has {} tokens", chunk.token_count);
        assert_eq!(chunk.content, text[chunk.byte_range.clone()]);
    }
    for pair in chunks.windows(2) {
        assert!(pair[0].byte_range.end <= pair[1].byte_range.start);
    }
    let words: usize = chunks
        .iter()
        .map(|c| c.content.split_whitespace().count())
        .sum();
    assert_eq!(words, 250);
}

#[test]
fn odd_leaf_is_promoted_unchanged() {
    let tree = integrity::build(["h1", "h2", "h3"].into_iter().enumerate().map(|(i, h)| {
        IntegrityLeaf::new(format!("c{i}"), h, "a.rs")
    }));

    let left = hash_pair("h1", "h2");
    assert_eq!(tree.total_leaves, 3);
    assert_eq!(tree.root_hash, hash_pair(&left, "h3"));

    let Some(IntegrityNode::Branch {
        left: l, right: r, ..
    }) = &tree.root
    else {
        panic!("expected a branch root");
    };
    assert_eq!(l.hash(), left);
    assert!(matches!(&**r, IntegrityNode::Leaf { hash, .. } if hash == "h3"));
}

#[test]
fn single_entry_cache_keeps_latest_key() {
    let cache: RetrievalCache<Vec<String>> = RetrievalCache::new(Duration::from_secs(300), 1);
    let k1 = CacheKey::new("project", &[0.1, 0.2], 10, 0.5);
    let k2 = CacheKey::new("project", &[0.3, 0.4], 10, 0.5);

    cache.set(k1.clone(), vec!["first".into()], None);
    cache.set(k2.clone(), vec!["second".into()], None);

    assert!(cache.get(&k1).is_none());
    assert_eq!(cache.get(&k2), Some(vec!["second".to_string()]));
    assert_eq!(cache.len(), 1);
}
