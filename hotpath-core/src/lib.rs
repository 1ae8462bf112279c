//! Hotpath core library - live report state for per-line execution counts

#![deny(warnings)]

// Global invariants enforced in this crate:
// - All report state is owned by a single ReportEngine
// - Time is always passed in; no operation reads the clock except now_ms
// - Payloads are applied in strictly increasing generated-at order
// - Directory totals equal the sum of their leaves at all times
// - Storage failures never change in-memory behavior

pub mod config;
pub mod diff;
pub mod engine;
pub mod filter;
pub mod flash;
pub mod freshness;
pub mod heatmap;
pub mod payload;
pub mod report;
pub mod selection;
pub mod source;
pub mod storage;
pub mod tree;

pub use config::ResolvedConfig;
pub use engine::{EngineOptions, LoadOutcome, ReportEngine};
pub use freshness::Liveness;
pub use payload::{FileRecord, ReportPayload};
pub use report::{render_json, render_source, render_text};
pub use source::{now_ms, DirectorySource, PollOutcome, Poller};
pub use storage::{FileStore, MemoryStore, Preferences};
pub use tree::{NodeId, NodeKey, Tree};

use anyhow::{Context, Result};
use std::path::Path;

/// Load the current report from a directory, preferring the JSON file
///
/// Falls back to the script-wrapped file when no JSON report exists.
pub fn load_report(report_dir: &Path, config: &ResolvedConfig) -> Result<ReportPayload> {
    let json_path = config.json_path(report_dir);
    if json_path.exists() {
        let json = std::fs::read_to_string(&json_path)
            .with_context(|| format!("failed to read {}", json_path.display()))?;
        return ReportPayload::from_json(&json)
            .with_context(|| format!("invalid report in {}", json_path.display()));
    }

    let script_path = config.script_path(report_dir);
    let script = std::fs::read_to_string(&script_path).with_context(|| {
        format!(
            "no report found in {} (looked for {} and {})",
            report_dir.display(),
            config.json_file,
            config.script_file
        )
    })?;
    ReportPayload::from_script(&script)
        .with_context(|| format!("invalid report in {}", script_path.display()))
}

/// Build an engine for a report directory with file-backed preferences
pub fn open_report(report_dir: &Path, config: &ResolvedConfig, now: u64) -> Result<ReportEngine> {
    let payload = load_report(report_dir, config)?;
    let prefs = Preferences::load(Box::new(FileStore::new(config.state_path(report_dir))));
    Ok(ReportEngine::at_load(
        EngineOptions::from(config),
        prefs,
        payload,
        0,
        now,
    ))
}
