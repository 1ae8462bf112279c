//! Diff ("lap") mode - counts relative to a captured baseline
//!
//! State machine: Off → Active (activate), Active → Active (lap),
//! Active → Off (clear).
//!
//! Global invariants enforced:
//! - Immediately after activation or a lap every displayed count is 0
//! - Directory deltas are the sum of their leaves' deltas
//! - Deltas are never clamped; a count that went down shows as negative
//! - Leaves absent from the baseline are measured against 0

use crate::tree::{NodeId, NodeKey, Tree, TreeNode};
use std::collections::{BTreeMap, HashMap};

/// Leaf totals and per-line counts captured when diff mode was (re-)armed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffBaseline {
    leaves: HashMap<NodeKey, LeafBaseline>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LeafBaseline {
    total: u64,
    counts: BTreeMap<u32, u64>,
}

impl DiffBaseline {
    /// Capture the current totals of every leaf in `tree`
    pub fn capture(tree: &Tree) -> Self {
        let leaves = tree
            .leaves()
            .map(|leaf| {
                (
                    leaf.key.clone(),
                    LeafBaseline {
                        total: leaf.total_count,
                        counts: leaf.counts.clone(),
                    },
                )
            })
            .collect();
        DiffBaseline { leaves }
    }

    /// Baseline total of a leaf (0 when it was not present at capture)
    pub fn total(&self, key: &NodeKey) -> u64 {
        self.leaves.get(key).map(|b| b.total).unwrap_or(0)
    }

    /// Baseline count of one line of a leaf
    pub fn line(&self, key: &NodeKey, line: u32) -> u64 {
        self.leaves
            .get(key)
            .and_then(|b| b.counts.get(&line).copied())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Diff mode state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DiffMode {
    #[default]
    Off,
    Active(DiffBaseline),
}

impl DiffMode {
    pub fn is_active(&self) -> bool {
        matches!(self, DiffMode::Active(_))
    }

    pub fn baseline(&self) -> Option<&DiffBaseline> {
        match self {
            DiffMode::Active(baseline) => Some(baseline),
            DiffMode::Off => None,
        }
    }

    /// Enter diff mode, or re-arm the baseline when already active
    pub fn activate(&mut self, tree: &Tree) {
        *self = DiffMode::Active(DiffBaseline::capture(tree));
    }

    /// Re-zero the baseline; a no-op when diff mode is off
    pub fn lap(&mut self, tree: &Tree) -> bool {
        if self.is_active() {
            self.activate(tree);
            true
        } else {
            false
        }
    }

    /// Leave diff mode and discard the baseline
    pub fn clear(&mut self) {
        *self = DiffMode::Off;
    }

    /// Count shown for a node: absolute when off, delta when active
    ///
    /// `None` when `id` does not belong to `tree`.
    pub fn displayed_count(&self, tree: &Tree, id: NodeId) -> Option<i64> {
        let node = tree.node(id)?;
        let count = match self {
            DiffMode::Off => node.total_count as i64,
            DiffMode::Active(baseline) if node.is_leaf() => leaf_delta(baseline, node),
            DiffMode::Active(baseline) => tree
                .leaf_descendants(id)
                .into_iter()
                .filter_map(|leaf| tree.node(leaf))
                .map(|leaf| leaf_delta(baseline, leaf))
                .sum(),
        };
        Some(count)
    }

    /// Count shown in the source gutter for one line of a leaf
    pub fn displayed_line_count(&self, node: &TreeNode, line: u32) -> i64 {
        let current = node.line_count(line) as i64;
        match self {
            DiffMode::Off => current,
            DiffMode::Active(baseline) => current - baseline.line(&node.key, line) as i64,
        }
    }
}

fn leaf_delta(baseline: &DiffBaseline, leaf: &TreeNode) -> i64 {
    leaf.total_count as i64 - baseline.total(&leaf.key) as i64
}
