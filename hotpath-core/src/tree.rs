//! File/folder tree construction and incremental reconciliation
//!
//! Turns a flat list of `FileRecord`s into a project → folder → file
//! hierarchy stored in an arena, and reconciles newer counts into an existing
//! tree without disturbing node identity.
//!
//! Global invariants enforced:
//! - Records are ordered by project, then path (both case-insensitive)
//! - Siblings are matched by (segment, depth), never by full path
//! - A directory total always equals the sum of its leaf descendants
//! - Chains of single-child directories below the project level are
//!   collapsed into one dot-joined node
//! - Reconciliation never adds or removes nodes
//! - A `NodeId` from an earlier build never resolves in a rebuilt tree

use crate::payload::{project_or_unknown, FileRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Stable identity of a node across reconciliations
///
/// Leaves are keyed `project::path`; directories by their display path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn leaf(project: &str, path: &str) -> Self {
        NodeKey(format!("{}::{}", project, path))
    }

    pub fn for_record(record: &FileRecord) -> Self {
        Self::leaf(record.project_name(), &record.path)
    }

    fn dir(display_path: &str) -> Self {
        NodeKey(display_path.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a node of one particular build of the tree
///
/// Reconciliation keeps handles valid. A rebuild starts a new generation,
/// after which older handles resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    generation: u32,
    index: usize,
}

/// A project, folder or file in the report tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TreeNode {
    pub name: String,
    /// Slash-joined display path (`project/dir/File.java`)
    pub path: String,
    pub key: NodeKey,
    pub depth: usize,
    pub project: String,
    pub total_count: u64,
    pub flash: bool,
    /// Path of the source file within its project (leaves only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip)]
    pub counts: BTreeMap<u32, u64>,
    #[serde(skip)]
    pub lines: Vec<String>,
    #[serde(skip)]
    children: Option<Vec<NodeId>>,
    #[serde(skip)]
    parent: Option<NodeId>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> &[NodeId] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Count recorded for a 1-based line (zero when absent)
    pub fn line_count(&self, line: u32) -> u64 {
        self.counts.get(&line).copied().unwrap_or(0)
    }
}

/// Arena-backed report tree with a key index
#[derive(Debug, Clone, Default)]
pub struct Tree {
    generation: u32,
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    index: HashMap<NodeKey, NodeId>,
}

impl Tree {
    /// Build a fresh tree from file records
    pub fn build<'a>(files: impl IntoIterator<Item = &'a FileRecord>) -> Self {
        let mut sorted: Vec<&FileRecord> = files.into_iter().collect();
        sorted.sort_by(|a, b| {
            a.project_name()
                .to_lowercase()
                .cmp(&b.project_name().to_lowercase())
                .then_with(|| a.path.to_lowercase().cmp(&b.path.to_lowercase()))
        });

        let mut roots: Vec<Draft> = Vec::new();
        for record in sorted {
            insert_record(&mut roots, record);
        }
        for root in &mut roots {
            compress(root);
        }

        let mut tree = Tree {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            ..Tree::default()
        };
        for draft in roots {
            let (id, _) = tree.push_draft(draft, None);
            tree.roots.push(id);
        }
        tree
    }

    /// Reconcile newer counts into existing leaves
    ///
    /// Only leaves already present are touched; records with no matching
    /// leaf are ignored and leaves with no matching record keep their data.
    /// Returns the keys of leaves whose total increased; those leaves have
    /// `flash` set.
    pub fn update<'a>(&mut self, files: impl IntoIterator<Item = &'a FileRecord>) -> Vec<NodeKey> {
        let lookup: HashMap<NodeKey, &FileRecord> = files
            .into_iter()
            .map(|f| (NodeKey::for_record(f), f))
            .collect();

        let mut increased = Vec::new();
        for node in self.nodes.iter_mut().filter(|n| n.is_leaf()) {
            let Some(record) = lookup.get(&node.key) else {
                continue;
            };
            let old_total = node.total_count;
            node.counts = record.counts.clone();
            node.total_count = record.total_count();
            if node.total_count > old_total {
                node.flash = true;
                increased.push(node.key.clone());
            }
        }

        self.recompute_directory_totals();
        increased
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Resolve a handle; `None` when it belongs to another build
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        if id.generation != self.generation {
            return None;
        }
        self.nodes.get(id.index)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.index.get(key).map(|&id| &self.nodes[id.index])
    }

    pub fn id_of(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in display (pre-)order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(index, n)| (self.id_at(index), n))
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Leaf nodes below `id` (or `id` itself when it is a leaf)
    pub fn leaf_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.node(id).is_none() {
            return out;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current.index];
            match &node.children {
                None => out.push(current),
                Some(children) => stack.extend(children.iter().rev().copied()),
            }
        }
        out
    }

    /// Find a node by its display path
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.path == path).map(|(id, _)| id)
    }

    /// Set or clear a node's flash flag; unknown keys are ignored
    pub fn set_flash(&mut self, key: &NodeKey, flash: bool) -> bool {
        match self.index.get(key) {
            Some(&id) => {
                self.nodes[id.index].flash = flash;
                true
            }
            None => false,
        }
    }

    /// Totals of every leaf, keyed by node key
    pub fn leaf_totals(&self) -> HashMap<NodeKey, u64> {
        self.leaves()
            .map(|n| (n.key.clone(), n.total_count))
            .collect()
    }

    fn id_at(&self, index: usize) -> NodeId {
        NodeId {
            generation: self.generation,
            index,
        }
    }

    fn push_draft(&mut self, draft: Draft, parent: Option<NodeId>) -> (NodeId, u64) {
        let id = self.id_at(self.nodes.len());
        let key = match &draft.kind {
            DraftKind::Leaf { file_path, .. } => NodeKey::leaf(&draft.project, file_path),
            DraftKind::Dir(_) => NodeKey::dir(&draft.path),
        };
        self.nodes.push(TreeNode {
            name: draft.name,
            path: draft.path,
            key: key.clone(),
            depth: draft.depth,
            project: draft.project,
            total_count: 0,
            flash: false,
            file_path: None,
            counts: BTreeMap::new(),
            lines: Vec::new(),
            children: None,
            parent,
        });
        self.index.insert(key, id);

        let total = match draft.kind {
            DraftKind::Leaf {
                file_path,
                counts,
                lines,
            } => {
                let total: u64 = counts.values().sum();
                let node = &mut self.nodes[id.index];
                node.file_path = Some(file_path);
                node.counts = counts;
                node.lines = lines;
                total
            }
            DraftKind::Dir(children) => {
                let mut ids = Vec::with_capacity(children.len());
                let mut total = 0;
                for child in children {
                    let (child_id, child_total) = self.push_draft(child, Some(id));
                    ids.push(child_id);
                    total += child_total;
                }
                self.nodes[id.index].children = Some(ids);
                total
            }
        };
        self.nodes[id.index].total_count = total;
        (id, total)
    }

    fn recompute_directory_totals(&mut self) {
        // Children are always pushed after their parent, so a reverse sweep
        // sees every child before its parent.
        for i in (0..self.nodes.len()).rev() {
            if let Some(children) = &self.nodes[i].children {
                let total: u64 = children.iter().map(|c| self.nodes[c.index].total_count).sum();
                self.nodes[i].total_count = total;
            }
        }
    }
}

/// Owned intermediate node used while building and compressing
struct Draft {
    name: String,
    path: String,
    depth: usize,
    project: String,
    kind: DraftKind,
}

enum DraftKind {
    Dir(Vec<Draft>),
    Leaf {
        file_path: String,
        counts: BTreeMap<u32, u64>,
        lines: Vec<String>,
    },
}

impl Draft {
    fn is_dir(&self) -> bool {
        matches!(self.kind, DraftKind::Dir(_))
    }
}

fn insert_record(roots: &mut Vec<Draft>, record: &FileRecord) {
    let project = project_or_unknown(record.project.as_deref()).to_string();
    let segments: Vec<&str> = std::iter::once(project.as_str())
        .chain(record.path.split('/'))
        .collect();
    let last = segments.len() - 1;

    let mut level = roots;
    let mut current_path = String::new();
    for (depth, segment) in segments.iter().enumerate() {
        if !current_path.is_empty() {
            current_path.push('/');
        }
        current_path.push_str(segment);

        let wants_dir = depth < last;
        let pos = level
            .iter()
            .position(|n| n.name == *segment && n.depth == depth && n.is_dir() == wants_dir);
        let pos = match pos {
            Some(pos) => pos,
            None => {
                level.push(Draft {
                    name: segment.to_string(),
                    path: current_path.clone(),
                    depth,
                    project: project.clone(),
                    kind: if wants_dir {
                        DraftKind::Dir(Vec::new())
                    } else {
                        DraftKind::Leaf {
                            file_path: record.path.clone(),
                            counts: BTreeMap::new(),
                            lines: Vec::new(),
                        }
                    },
                });
                level.len() - 1
            }
        };

        let node = &mut level[pos];
        match &mut node.kind {
            DraftKind::Dir(children) => level = children,
            DraftKind::Leaf { counts, lines, .. } => {
                // Duplicate (project, path) records: the later one wins
                *counts = record.counts.clone();
                *lines = record.lines();
                return;
            }
        }
    }
}

fn compress(node: &mut Draft) {
    loop {
        let DraftKind::Dir(children) = &mut node.kind else {
            return;
        };
        if node.depth > 0 && children.len() == 1 && children[0].is_dir() {
            let Some(child) = children.pop() else {
                return;
            };
            node.name = format!("{}.{}", node.name, child.name);
            node.path = child.path;
            node.kind = child.kind;
            continue;
        }
        for child in children.iter_mut() {
            compress(child);
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, path: &str, counts: &[(u32, u64)]) -> FileRecord {
        FileRecord::new(Some(project), path, counts, "line1\nline2")
    }

    fn names(tree: &Tree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| tree.node(id).unwrap().name.clone()).collect()
    }

    #[test]
    fn test_single_file_hierarchy() {
        let files = vec![record("p", "a/B.java", &[(10, 5)])];
        let tree = Tree::build(&files);

        assert_eq!(names(&tree, tree.roots()), vec!["p"]);
        let project = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(project.depth, 0);
        assert_eq!(project.total_count, 5);

        let a = tree.node(project.children()[0]).unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.path, "p/a");
        let leaf = tree.node(a.children()[0]).unwrap();
        assert_eq!(leaf.name, "B.java");
        assert!(leaf.is_leaf());
        assert_eq!(leaf.total_count, 5);
        assert_eq!(leaf.key, NodeKey::leaf("p", "a/B.java"));
        assert_eq!(leaf.lines, vec!["line1", "line2"]);
    }

    #[test]
    fn test_shared_prefix_shares_ancestor() {
        let files = vec![
            record("p", "a/X.java", &[(1, 1)]),
            record("p", "a/Y.java", &[(1, 2)]),
        ];
        let tree = Tree::build(&files);
        let project = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(project.children().len(), 1);
        let a = tree.node(project.children()[0]).unwrap();
        assert_eq!(names(&tree, a.children()), vec!["X.java", "Y.java"]);
        assert_eq!(a.total_count, 3);
    }

    #[test]
    fn test_sorting_is_case_insensitive() {
        let files = vec![
            record("zeta", "b.java", &[]),
            record("Alpha", "Z.java", &[]),
            record("alpha2", "x.java", &[]),
            record("Alpha", "a.java", &[]),
        ];
        let tree = Tree::build(&files);
        assert_eq!(names(&tree, tree.roots()), vec!["Alpha", "alpha2", "zeta"]);
        let alpha = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(names(&tree, alpha.children()), vec!["a.java", "Z.java"]);
    }

    #[test]
    fn test_directory_compression() {
        let files = vec![
            record("p", "io/github/x/A.java", &[(1, 1)]),
            record("p", "io/github/x/B.java", &[(1, 1)]),
        ];
        let tree = Tree::build(&files);
        let project = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(project.name, "p");
        let compressed = tree.node(project.children()[0]).unwrap();
        assert_eq!(compressed.name, "io.github.x");
        assert_eq!(compressed.path, "p/io/github/x");
        assert_eq!(names(&tree, compressed.children()), vec!["A.java", "B.java"]);
    }

    #[test]
    fn test_compression_stops_at_branch() {
        let files = vec![
            record("p", "io/github/x/A.java", &[]),
            record("p", "io/github/y/B.java", &[]),
        ];
        let tree = Tree::build(&files);
        let project = tree.node(tree.roots()[0]).unwrap();
        let io_github = tree.node(project.children()[0]).unwrap();
        assert_eq!(io_github.name, "io.github");
        assert_eq!(names(&tree, io_github.children()), vec!["x", "y"]);
    }

    #[test]
    fn test_project_and_leaf_never_compressed() {
        let files = vec![record("p", "only/A.java", &[])];
        let tree = Tree::build(&files);
        let project = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(project.name, "p");
        let only = tree.node(project.children()[0]).unwrap();
        assert_eq!(only.name, "only");
        assert_eq!(names(&tree, only.children()), vec!["A.java"]);
    }

    #[test]
    fn test_missing_project_defaults_to_unknown() {
        let files = vec![FileRecord::new(None, "A.java", &[(1, 3)], "")];
        let tree = Tree::build(&files);
        let root = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(root.name, "unknown");
        assert!(tree.get(&NodeKey::leaf("unknown", "A.java")).is_some());
    }

    #[test]
    fn test_aggregation_invariant() {
        let files = vec![
            record("p", "a/b/One.java", &[(1, 3), (2, 4)]),
            record("p", "a/c/Two.java", &[(5, 10)]),
            record("p", "d/Three.java", &[]),
            record("q", "Four.java", &[(1, 1)]),
        ];
        let tree = Tree::build(&files);
        for (id, node) in tree.iter() {
            let leaf_sum: u64 = tree
                .leaf_descendants(id)
                .iter()
                .map(|&leaf| tree.node(leaf).unwrap().total_count)
                .sum();
            assert_eq!(node.total_count, leaf_sum, "node {}", node.path);
        }
        assert_eq!(tree.node(tree.roots()[0]).unwrap().total_count, 17);
    }

    #[test]
    fn test_update_reconciles_counts_and_flashes() {
        let files = vec![
            record("p", "a/B.java", &[(10, 5)]),
            record("p", "a/C.java", &[(1, 1)]),
        ];
        let mut tree = Tree::build(&files);
        let b_id = tree.id_of(&NodeKey::leaf("p", "a/B.java")).unwrap();

        let newer = vec![
            record("p", "a/B.java", &[(10, 12)]),
            record("p", "a/C.java", &[(1, 1)]),
        ];
        let increased = tree.update(&newer);

        assert_eq!(increased, vec![NodeKey::leaf("p", "a/B.java")]);
        assert_eq!(tree.id_of(&NodeKey::leaf("p", "a/B.java")), Some(b_id));
        let b = tree.node(b_id).unwrap();
        assert_eq!(b.total_count, 12);
        assert!(b.flash);
        assert!(!tree.get(&NodeKey::leaf("p", "a/C.java")).unwrap().flash);
        assert_eq!(tree.node(tree.roots()[0]).unwrap().total_count, 13);
    }

    #[test]
    fn test_update_does_not_grow_tree() {
        let files = vec![record("p", "a/B.java", &[(1, 1)])];
        let mut tree = Tree::build(&files);
        let before = tree.len();

        let newer = vec![
            record("p", "a/B.java", &[(1, 1)]),
            record("p", "a/New.java", &[(1, 9)]),
        ];
        let increased = tree.update(&newer);
        assert!(increased.is_empty());
        assert_eq!(tree.len(), before);
        assert!(tree.get(&NodeKey::leaf("p", "a/New.java")).is_none());
    }

    #[test]
    fn test_update_leaves_unmatched_leaf_stale() {
        let files = vec![
            record("p", "A.java", &[(1, 4)]),
            record("p", "B.java", &[(1, 2)]),
        ];
        let mut tree = Tree::build(&files);
        tree.update(&[record("p", "A.java", &[(1, 6)])]);
        assert_eq!(tree.get(&NodeKey::leaf("p", "B.java")).unwrap().total_count, 2);
        assert_eq!(tree.node(tree.roots()[0]).unwrap().total_count, 8);
    }

    #[test]
    fn test_update_decrease_does_not_flash() {
        let files = vec![record("p", "A.java", &[(1, 4)])];
        let mut tree = Tree::build(&files);
        let increased = tree.update(&[record("p", "A.java", &[(1, 1)])]);
        assert!(increased.is_empty());
        let leaf = tree.get(&NodeKey::leaf("p", "A.java")).unwrap();
        assert_eq!(leaf.total_count, 1);
        assert!(!leaf.flash);
    }

    #[test]
    fn test_ids_do_not_cross_builds() {
        let files = vec![record("p", "a/B.java", &[(1, 1)])];
        let mut first = Tree::build(&files);
        let id = first.id_of(&NodeKey::leaf("p", "a/B.java")).unwrap();

        first.update(&[record("p", "a/B.java", &[(1, 2)])]);
        assert_eq!(first.node(id).unwrap().total_count, 2);

        let second = Tree::build(&files);
        assert!(second.node(id).is_none());
        assert!(second.leaf_descendants(id).is_empty());
        assert!(Tree::default().node(id).is_none());
    }

    #[test]
    fn test_find_by_path_and_set_flash() {
        let files = vec![record("p", "a/B.java", &[(1, 1)])];
        let mut tree = Tree::build(&files);
        let id = tree.find_by_path("p/a/B.java").unwrap();
        assert_eq!(tree.node(id).unwrap().name, "B.java");

        assert!(tree.set_flash(&NodeKey::leaf("p", "a/B.java"), true));
        assert!(tree.node(id).unwrap().flash);
        assert!(!tree.set_flash(&NodeKey::leaf("p", "gone.java"), false));
    }

    #[test]
    fn test_file_and_folder_with_same_name() {
        let files = vec![record("p", "a", &[(1, 1)]), record("p", "a/B.java", &[(1, 2)])];
        let tree = Tree::build(&files);
        let project = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(project.children().len(), 2);
        assert_eq!(project.total_count, 3);
    }
}
