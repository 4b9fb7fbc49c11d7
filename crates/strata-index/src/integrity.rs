//! SHA-256 integrity tree over chunk content hashes.
//!
//! An unpaired trailing node is promoted to the next level unchanged rather
//! than paired with a copy of itself, so persisted roots depend on that
//! construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content hash for a chunk (blake3, hex).
#[must_use]
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// `hex(SHA-256(left ‖ right))` over the hex hash strings.
#[must_use]
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// Leaf input: one chunk's identity and content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityLeaf {
    pub id: String,
    pub hash: String,
    pub file_path: String,
}

impl IntegrityLeaf {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        hash: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            hash: hash.into(),
            file_path: file_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IntegrityNode {
    Leaf {
        id: String,
        hash: String,
        file_path: String,
    },
    Branch {
        id: String,
        hash: String,
        left: Box<IntegrityNode>,
        right: Box<IntegrityNode>,
    },
}

impl IntegrityNode {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Leaf { id, .. } | Self::Branch { id, .. } => id,
        }
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        match self {
            Self::Leaf { hash, .. } | Self::Branch { hash, .. } => hash,
        }
    }

    fn branch(left: Self, right: Self) -> Self {
        Self::Branch {
            id: uuid::Uuid::new_v4().to_string(),
            hash: hash_pair(left.hash(), right.hash()),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `(file_path, hash)` of every leaf, left to right.
    #[must_use]
    pub fn leaves(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Leaf {
                hash, file_path, ..
            } => vec![(file_path.as_str(), hash.as_str())],
            Self::Branch { left, right, .. } => {
                let mut out = left.leaves();
                out.extend(right.leaves());
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegrityTree {
    /// Empty string for an empty tree.
    pub root_hash: String,
    pub root: Option<IntegrityNode>,
    pub total_leaves: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Leaf,
    Branch,
}

/// A tree node prepared for row storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatNode {
    pub id: String,
    pub hash: String,
    pub kind: NodeKind,
    pub file_path: Option<String>,
    pub parent_id: Option<String>,
    pub left_id: Option<String>,
    pub right_id: Option<String>,
    /// Depth from the root (root is 0).
    pub level: usize,
    /// Left-to-right index among nodes at the same level.
    pub position: usize,
}

/// Build the tree bottom-up, pairing adjacent nodes left to right.
#[must_use]
pub fn build(leaves: impl IntoIterator<Item = IntegrityLeaf>) -> IntegrityTree {
    let mut level: Vec<IntegrityNode> = leaves
        .into_iter()
        .map(|l| IntegrityNode::Leaf {
            id: l.id,
            hash: l.hash,
            file_path: l.file_path,
        })
        .collect();
    let total_leaves = level.len();
    if level.is_empty() {
        return IntegrityTree::default();
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut nodes = level.into_iter();
        while let Some(left) = nodes.next() {
            match nodes.next() {
                Some(right) => next.push(IntegrityNode::branch(left, right)),
                None => next.push(left),
            }
        }
        level = next;
    }

    let root = level.pop();
    let root_hash = root
        .as_ref()
        .map(|r| r.hash().to_string())
        .unwrap_or_default();
    tracing::debug!(total_leaves, root_hash = %root_hash, "built integrity tree");
    IntegrityTree {
        root_hash,
        root,
        total_leaves,
    }
}

/// Pre-order traversal annotated with level and position.
#[must_use]
pub fn flatten(root: &IntegrityNode) -> Vec<FlatNode> {
    fn visit(
        node: &IntegrityNode,
        parent: Option<&str>,
        level: usize,
        positions: &mut Vec<usize>,
        out: &mut Vec<FlatNode>,
    ) {
        if positions.len() <= level {
            positions.resize(level + 1, 0);
        }
        let position = positions[level];
        positions[level] += 1;

        match node {
            IntegrityNode::Leaf {
                id,
                hash,
                file_path,
            } => out.push(FlatNode {
                id: id.clone(),
                hash: hash.clone(),
                kind: NodeKind::Leaf,
                file_path: Some(file_path.clone()),
                parent_id: parent.map(str::to_string),
                left_id: None,
                right_id: None,
                level,
                position,
            }),
            IntegrityNode::Branch {
                id,
                hash,
                left,
                right,
            } => {
                out.push(FlatNode {
                    id: id.clone(),
                    hash: hash.clone(),
                    kind: NodeKind::Branch,
                    file_path: None,
                    parent_id: parent.map(str::to_string),
                    left_id: Some(left.id().to_string()),
                    right_id: Some(right.id().to_string()),
                    level,
                    position,
                });
                visit(left, Some(id.as_str()), level + 1, positions, out);
                visit(right, Some(id.as_str()), level + 1, positions, out);
            }
        }
    }

    let mut out = Vec::new();
    visit(root, None, 0, &mut Vec::new(), &mut out);
    out
}

impl IntegrityTree {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Flattened nodes, empty for an empty tree.
    #[must_use]
    pub fn flatten(&self) -> Vec<FlatNode> {
        self.root.as_ref().map(flatten).unwrap_or_default()
    }

    /// Whether `leaves` rebuild to the same root hash.
    #[must_use]
    pub fn verify(&self, leaves: impl IntoIterator<Item = IntegrityLeaf>) -> bool {
        build(leaves).root_hash == self.root_hash
    }

    fn hashes_by_file(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        if let Some(root) = &self.root {
            for (file, hash) in root.leaves() {
                map.entry(file).or_default().push(hash);
            }
        }
        map
    }
}

/// Files whose leaf hashes differ between two trees, including files
/// present in only one of them. Sorted by path.
#[must_use]
pub fn changed_files(old: &IntegrityTree, new: &IntegrityTree) -> Vec<String> {
    if old.root_hash == new.root_hash {
        return Vec::new();
    }
    let before = old.hashes_by_file();
    let after = new.hashes_by_file();
    let mut files: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|f| before.get(*f) != after.get(*f))
        .map(|f| (*f).to_string())
        .collect();
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(hashes: &[&str]) -> Vec<IntegrityLeaf> {
        hashes
            .iter()
            .enumerate()
            .map(|(i, h)| IntegrityLeaf::new(format!("c{i}"), *h, "a.rs"))
            .collect()
    }

    #[test]
    fn empty_input_yields_empty_tree() {
        let tree = build(Vec::new());
        assert_eq!(tree.root_hash, "");
        assert!(tree.root.is_none());
        assert_eq!(tree.total_leaves, 0);
        assert!(tree.flatten().is_empty());
    }

    #[test]
    fn single_leaf_root_is_content_hash() {
        let tree = build(leaves(&["h1"]));
        assert_eq!(tree.root_hash, "h1");
        assert_eq!(tree.flatten().len(), 1);
    }

    #[test]
    fn three_leaves_promote_odd_node() {
        let tree = build(leaves(&["h1", "h2", "h3"]));
        let h12 = hash_pair("h1", "h2");
        assert_eq!(tree.root_hash, hash_pair(&h12, "h3"));

        let flat = tree.flatten();
        assert_eq!(flat.len(), 5);
        let level1: Vec<_> = flat.iter().filter(|n| n.level == 1).collect();
        assert_eq!(level1.len(), 2);
        assert_eq!(level1[0].hash, h12);
        assert_eq!(level1[1].hash, "h3");
        assert_eq!(level1[1].kind, NodeKind::Leaf);
        assert_eq!(level1[1].position, 1);
    }

    #[test]
    fn flatten_count_is_two_n_minus_one() {
        for n in 1..=17 {
            let hashes: Vec<String> = (0..n).map(|i| format!("h{i}")).collect();
            let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
            let tree = build(leaves(&refs));
            assert_eq!(tree.flatten().len(), 2 * n - 1, "n = {n}");
            assert_eq!(tree.total_leaves, n);
        }
    }

    #[test]
    fn flatten_is_preorder_with_parents() {
        let tree = build(leaves(&["a", "b", "c", "d"]));
        let flat = tree.flatten();
        assert_eq!(flat[0].level, 0);
        assert!(flat[0].parent_id.is_none());
        assert_eq!(flat[1].parent_id.as_deref(), Some(flat[0].id.as_str()));
        assert_eq!(flat[2].hash, "a");
        assert_eq!(flat[3].hash, "b");
        let positions: Vec<_> = flat
            .iter()
            .filter(|n| n.level == 2)
            .map(|n| n.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn changing_one_chunk_changes_root() {
        let base = build(leaves(&["h1", "h2", "h3", "h4", "h5"]));
        let changed = build(leaves(&["h1", "h2", "hX", "h4", "h5"]));
        assert_ne!(base.root_hash, changed.root_hash);
    }

    #[test]
    fn root_hash_is_deterministic() {
        let a = build(leaves(&["h1", "h2", "h3"]));
        let b = build(leaves(&["h1", "h2", "h3"]));
        assert_eq!(a.root_hash, b.root_hash);
        assert!(a.verify(leaves(&["h1", "h2", "h3"])));
        assert!(!a.verify(leaves(&["h1", "h3", "h2"])));
    }

    #[test]
    fn changed_files_reports_modified_added_removed() {
        let old = build(vec![
            IntegrityLeaf::new("1", "a1", "a.rs"),
            IntegrityLeaf::new("2", "b1", "b.rs"),
            IntegrityLeaf::new("3", "c1", "c.rs"),
        ]);
        let new = build(vec![
            IntegrityLeaf::new("1", "a1", "a.rs"),
            IntegrityLeaf::new("2", "b2", "b.rs"),
            IntegrityLeaf::new("4", "d1", "d.rs"),
        ]);
        assert_eq!(changed_files(&old, &new), vec!["b.rs", "c.rs", "d.rs"]);
        assert!(changed_files(&old, &old).is_empty());
    }

    #[test]
    fn content_hash_is_blake3_hex() {
        let h = content_hash("fn main() {}");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("fn main() {}"));
        assert_ne!(h, content_hash("fn main() { }"));
    }

    #[test]
    fn node_serializes_tagged() {
        let tree = build(leaves(&["h1"]));
        let json = serde_json::to_value(tree.root.unwrap()).unwrap();
        assert_eq!(json["type"], "leaf");
    }
}
