//! Visibility toggles applied before tree construction

use crate::payload::FileRecord;

/// What a toggle invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    /// The set of visible files changed; the tree must be rebuilt
    Membership,
    /// Only presentation changed; the tree is untouched
    Display,
}

/// User visibility toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityFilter {
    /// Include files that were never executed
    pub show_all: bool,
    /// Show directory-level totals
    pub show_aggregates: bool,
}

impl Default for VisibilityFilter {
    fn default() -> Self {
        VisibilityFilter {
            show_all: false,
            show_aggregates: true,
        }
    }
}

impl VisibilityFilter {
    pub fn admits(&self, record: &FileRecord) -> bool {
        self.show_all || record.is_hotpath()
    }

    /// Records that enter the tree builder
    pub fn apply<'a>(&self, files: &'a [FileRecord]) -> Vec<&'a FileRecord> {
        files.iter().filter(|f| self.admits(f)).collect()
    }

    pub fn toggle_show_all(&mut self) -> FilterChange {
        self.show_all = !self.show_all;
        FilterChange::Membership
    }

    pub fn toggle_aggregates(&mut self) -> FilterChange {
        self.show_aggregates = !self.show_aggregates;
        FilterChange::Display
    }
}
