//! Report state engine
//!
//! Owns the current payload, the tree built from it, the diff baseline,
//! the freshness monitor and the user's preferences. The view layer reads
//! from the engine and issues commands to it; nothing else mutates this
//! state.
//!
//! Global invariants enforced:
//! - A payload is applied only if the freshness monitor accepts it
//! - The tree is rebuilt when the visible file set changes and reconciled
//!   otherwise
//! - The heatmap maximum is computed over every file, filtered or not
//! - Every flashed leaf has exactly one pending clear deadline

use crate::config::ResolvedConfig;
use crate::diff::DiffMode;
use crate::filter::{FilterChange, VisibilityFilter};
use crate::flash::{FlashScheduler, FLASH_MS};
use crate::freshness::{FreshnessMonitor, Liveness, OFFLINE_TIMEOUT_MS};
use crate::heatmap::{self, Hsla};
use crate::payload::{global_max, FileRecord, ReportPayload};
use crate::selection::{path_from_fragment, Selection};
use crate::storage::{Preferences, Theme};
use crate::tree::{NodeId, NodeKey, Tree, TreeNode};
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Timing knobs of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub offline_timeout_ms: u64,
    pub flash_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            offline_timeout_ms: OFFLINE_TIMEOUT_MS,
            flash_ms: FLASH_MS,
        }
    }
}

impl From<&ResolvedConfig> for EngineOptions {
    fn from(config: &ResolvedConfig) -> Self {
        EngineOptions {
            offline_timeout_ms: config.offline_timeout_ms,
            flash_ms: config.flash_ms,
        }
    }
}

/// Result of offering a payload to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The payload was newer and is now current
    Applied {
        /// True when the tree was rebuilt rather than reconciled
        rebuilt: bool,
        /// Leaves that started flashing
        flashed: Vec<NodeKey>,
    },
    /// The payload was not newer than the current one
    Discarded,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoadOutcome::Applied { .. })
    }
}

/// What a status tick changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub liveness: Liveness,
    /// Previous liveness, when it changed on this tick
    pub previous: Option<Liveness>,
    /// Leaves whose flash was cleared
    pub cleared: Vec<NodeKey>,
}

/// One line of the annotated source view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceLine {
    /// 1-based line number
    pub number: u32,
    pub text: String,
    /// Count shown in the gutter (a delta while diff mode is active)
    pub count: i64,
    /// Heat color of the absolute count
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_color")]
    pub color: Option<Hsla>,
}

fn serialize_color<S: serde::Serializer>(
    color: &Option<Hsla>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match color {
        Some(c) => serializer.collect_str(c),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug)]
pub struct ReportEngine {
    files: Vec<FileRecord>,
    global_max: u64,
    tree: Tree,
    diff: DiffMode,
    freshness: FreshnessMonitor,
    filter: VisibilityFilter,
    flashes: FlashScheduler,
    /// Last known total per leaf, kept across rebuilds
    last_totals: HashMap<NodeKey, u64>,
    prefs: Preferences,
    selection: Selection,
}

impl ReportEngine {
    /// An engine with no data yet
    pub fn new(options: EngineOptions, prefs: Preferences) -> Self {
        let filter = VisibilityFilter {
            show_all: prefs.show_all(),
            show_aggregates: prefs.show_aggregates(),
        };
        ReportEngine {
            files: Vec::new(),
            global_max: 1,
            tree: Tree::default(),
            diff: DiffMode::Off,
            freshness: FreshnessMonitor::new(options.offline_timeout_ms),
            filter,
            flashes: FlashScheduler::new(options.flash_ms),
            last_totals: HashMap::new(),
            prefs,
            selection: Selection::default(),
        }
    }

    /// An engine seeded with the payload embedded in the report
    ///
    /// `last_update` starts at the newest of the payload's timestamp, the
    /// generated-at hint and `loaded_at`.
    pub fn at_load(
        options: EngineOptions,
        prefs: Preferences,
        initial: ReportPayload,
        generated_at_hint: u64,
        loaded_at: u64,
    ) -> Self {
        let mut engine = Self::new(options, prefs);
        engine.freshness = FreshnessMonitor::at_load(
            options.offline_timeout_ms,
            initial.generated_at,
            generated_at_hint,
            loaded_at,
        );
        engine.replace_files(initial.files);
        engine.rebuild(loaded_at);
        engine
    }

    /// Offer a payload; `generated_at` overrides the payload's own
    /// timestamp when non-zero
    pub fn load_payload(&mut self, payload: ReportPayload, generated_at: u64, now: u64) -> LoadOutcome {
        let incoming_at = if generated_at > 0 {
            generated_at
        } else {
            payload.generated_at
        };
        if !self.freshness.accept(incoming_at, now) {
            tracing::debug!(
                generated_at = incoming_at,
                last_update = self.freshness.last_update(),
                "discarding stale payload"
            );
            return LoadOutcome::Discarded;
        }

        self.replace_files(payload.files);
        let visible: BTreeSet<NodeKey> = self
            .filter
            .apply(&self.files)
            .into_iter()
            .map(NodeKey::for_record)
            .collect();
        let current: BTreeSet<NodeKey> = self.tree.leaves().map(|n| n.key.clone()).collect();

        let rebuilt = visible != current;
        let flashed = if rebuilt {
            self.rebuild(now)
        } else {
            self.reconcile(now)
        };
        tracing::info!(
            generated_at = incoming_at,
            files = self.files.len(),
            rebuilt,
            flashed = flashed.len(),
            "applied payload"
        );
        LoadOutcome::Applied { rebuilt, flashed }
    }

    /// Push-style entry point taking raw JSON; `null` is ignored
    pub fn push_value(
        &mut self,
        data: serde_json::Value,
        generated_at: u64,
        now: u64,
    ) -> Result<LoadOutcome> {
        if data.is_null() {
            return Ok(LoadOutcome::Discarded);
        }
        let payload = ReportPayload::from_value(data)?;
        Ok(self.load_payload(payload, generated_at, now))
    }

    /// Expire due flashes and recompute liveness
    pub fn tick(&mut self, now: u64) -> TickReport {
        let cleared = self.expire_flashes(now);
        let (liveness, previous) = self.freshness.tick(now);
        TickReport {
            liveness,
            previous,
            cleared,
        }
    }

    /// Clear every flash whose deadline has passed
    ///
    /// Deadlines for keys that no longer exist in the tree are dropped.
    pub fn expire_flashes(&mut self, now: u64) -> Vec<NodeKey> {
        self.flashes
            .take_due(now)
            .into_iter()
            .filter(|key| self.tree.set_flash(key, false))
            .collect()
    }

    /// When the next flash needs clearing
    pub fn next_flash_deadline(&self) -> Option<u64> {
        self.flashes.next_deadline()
    }

    pub fn liveness(&self, now: u64) -> Liveness {
        self.freshness.state(now)
    }

    pub fn last_update(&self) -> u64 {
        self.freshness.last_update()
    }

    pub fn record_poll_failure(&mut self) {
        self.freshness.record_poll_failure();
    }

    pub fn record_poll_success(&mut self) {
        self.freshness.record_poll_success();
    }

    // --- visibility ---

    /// Flip show-all and rebuild the tree
    pub fn toggle_show_all(&mut self, now: u64) -> FilterChange {
        let change = self.filter.toggle_show_all();
        self.prefs.set_show_all(self.filter.show_all);
        self.rebuild(now);
        change
    }

    /// Flip directory aggregates; the tree is untouched
    pub fn toggle_aggregates(&mut self) -> FilterChange {
        let change = self.filter.toggle_aggregates();
        self.prefs.set_show_aggregates(self.filter.show_aggregates);
        change
    }

    pub fn filter(&self) -> VisibilityFilter {
        self.filter
    }

    // --- diff mode ---

    /// Enter diff mode, or lap when it is already active
    pub fn toggle_diff(&mut self) {
        if !self.diff.lap(&self.tree) {
            self.diff.activate(&self.tree);
        }
    }

    pub fn lap(&mut self) -> bool {
        self.diff.lap(&self.tree)
    }

    pub fn clear_diff(&mut self) {
        self.diff.clear();
    }

    pub fn diff(&self) -> &DiffMode {
        &self.diff
    }

    // --- selection ---

    /// Select a file by display path; returns false when nothing changed
    pub fn select(&mut self, path: &str) -> bool {
        match self.tree.find_by_path(path) {
            Some(id) if self.tree.node(id).is_some_and(TreeNode::is_leaf) => {
                self.selection.select(path)
            }
            _ => false,
        }
    }

    /// Restore the selection from a URL fragment
    pub fn restore_from_fragment(&mut self, fragment: &str) -> Option<NodeId> {
        let path = path_from_fragment(fragment)?;
        self.select(&path);
        self.selected()
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selection.resolve(&self.tree)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    // --- persisted layout ---

    /// Collapse or expand a folder; returns true when now collapsed
    pub fn toggle_folder(&mut self, path: &str) -> bool {
        self.prefs.toggle_collapsed(path)
    }

    pub fn is_collapsed(&self, id: NodeId) -> bool {
        self.tree
            .node(id)
            .is_some_and(|node| node.is_dir() && self.prefs.is_collapsed(&node.path))
    }

    pub fn set_sidebar_width(&mut self, width: u32) -> u32 {
        self.prefs.set_sidebar_width(width)
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.prefs.toggle_theme()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    // --- reads ---

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Every file of the current payload, unfiltered
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Count shown for a node (a delta while diff mode is active)
    ///
    /// Handles taken before a rebuild resolve to `None`.
    pub fn displayed_count(&self, id: NodeId) -> Option<i64> {
        self.diff.displayed_count(&self.tree, id)
    }

    /// Badge value for a node, `None` when no badge is shown
    ///
    /// Files show a badge when their count is non-zero, and always while
    /// diffing. Folders show their aggregate only when aggregates are on.
    pub fn badge(&self, id: NodeId) -> Option<i64> {
        let node = self.tree.node(id)?;
        let shown = if node.is_dir() {
            self.filter.show_aggregates
        } else {
            self.diff.is_active() || node.total_count > 0
        };
        if shown {
            self.displayed_count(id)
        } else {
            None
        }
    }

    /// Heatmap maximum over every file of the payload
    pub fn global_max(&self) -> u64 {
        self.global_max
    }

    pub fn heat(&self, count: u64) -> Option<Hsla> {
        heatmap::intensity(count, self.global_max)
    }

    /// Number of files that pass the visibility filter
    pub fn total_files(&self) -> usize {
        self.filter.apply(&self.files).len()
    }

    /// Sum of every count in the payload, unfiltered
    pub fn total_executions(&self) -> u64 {
        self.files.iter().map(FileRecord::total_count).sum()
    }

    /// Lines of a file with their gutter counts and heat colors
    pub fn annotated_source(&self, id: NodeId) -> Option<Vec<SourceLine>> {
        let node = self.tree.node(id)?;
        let lines = node
            .lines
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let number = i as u32 + 1;
                SourceLine {
                    number,
                    text: text.clone(),
                    count: self.diff.displayed_line_count(node, number),
                    color: self.heat(node.line_count(number)),
                }
            })
            .collect();
        Some(lines)
    }

    fn replace_files(&mut self, files: Vec<FileRecord>) {
        self.global_max = global_max(&files);
        self.files = files;
    }

    /// Full rebuild from the filtered files
    ///
    /// Leaves that existed before with a non-zero total and grew still
    /// flash.
    fn rebuild(&mut self, now: u64) -> Vec<NodeKey> {
        self.tree = Tree::build(self.filter.apply(&self.files));

        let mut flashed = Vec::new();
        for leaf in self.tree.leaves() {
            let old_total = self.last_totals.get(&leaf.key).copied().unwrap_or(0);
            if old_total > 0 && leaf.total_count > old_total {
                flashed.push(leaf.key.clone());
            }
        }
        for key in &flashed {
            self.tree.set_flash(key, true);
            self.flashes.arm(key.clone(), now);
        }
        self.remember_totals();
        flashed
    }

    fn reconcile(&mut self, now: u64) -> Vec<NodeKey> {
        let visible = self.filter.apply(&self.files);
        let flashed = self.tree.update(visible);
        for key in &flashed {
            self.flashes.arm(key.clone(), now);
        }
        self.remember_totals();
        flashed
    }

    /// Keep known totals only for files still in the payload
    fn remember_totals(&mut self) {
        let present: BTreeSet<NodeKey> = self.files.iter().map(NodeKey::for_record).collect();
        self.last_totals.retain(|key, _| present.contains(key));
        self.last_totals.extend(self.tree.leaf_totals());
    }
}
