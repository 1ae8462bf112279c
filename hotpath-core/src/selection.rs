//! Selected file and its addressable URL-fragment form

use crate::tree::{NodeId, Tree, TreeNode};

/// The file currently shown in the source pane, by display path
///
/// Selection is stored by path rather than node id so it survives a full
/// tree rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    path: Option<String>,
}

impl Selection {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Select a path; returns false when it was already selected
    pub fn select(&mut self, path: &str) -> bool {
        if self.path.as_deref() == Some(path) {
            return false;
        }
        self.path = Some(path.to_string());
        true
    }

    /// `#` followed by the percent-encoded path
    pub fn fragment(&self) -> Option<String> {
        self.path.as_deref().map(fragment_for)
    }

    /// Resolve the selection against a (possibly rebuilt) tree
    pub fn resolve(&self, tree: &Tree) -> Option<NodeId> {
        let path = self.path.as_deref()?;
        tree.find_by_path(path)
            .filter(|&id| tree.node(id).is_some_and(TreeNode::is_leaf))
    }
}

/// URL fragment addressing a display path
pub fn fragment_for(path: &str) -> String {
    format!("#{}", urlencoding::encode(path))
}

/// Decode a URL fragment (with or without the leading `#`)
pub fn path_from_fragment(fragment: &str) -> Option<String> {
    let encoded = fragment.strip_prefix('#').unwrap_or(fragment);
    if encoded.is_empty() {
        return None;
    }
    match urlencoding::decode(encoded) {
        Ok(path) => Some(path.into_owned()),
        Err(e) => {
            tracing::warn!(fragment, "ignoring undecodable fragment: {}", e);
            None
        }
    }
}
