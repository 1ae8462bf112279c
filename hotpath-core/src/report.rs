//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Rows follow tree display order; collapsed folders hide their subtree
//! - Counts are rendered exactly as the engine displays them (deltas while
//!   diffing)

use crate::engine::{ReportEngine, SourceLine};
use crate::freshness::Liveness;
use crate::tree::NodeId;
use anyhow::{Context, Result};
use serde::Serialize;

/// Headline figures of a report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportSummary {
    pub liveness: Liveness,
    pub last_update: u64,
    pub total_files: usize,
    pub total_executions: u64,
    pub global_max: u64,
    pub diff_active: bool,
}

/// One visible row of the file tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TreeRow {
    pub name: String,
    pub path: String,
    /// Nesting level in the rendered tree
    pub level: usize,
    pub is_dir: bool,
    pub total_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    pub flash: bool,
    pub collapsed: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ReportView<'a> {
    summary: ReportSummary,
    rows: Vec<TreeRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected: Option<SelectedView<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SelectedView<'a> {
    path: &'a str,
    fragment: String,
    lines: Vec<SourceLine>,
}

/// Compact count for tree badges: `1.23M`, `12.3k`, or the plain number
pub fn format_count(count: i64) -> String {
    let sign = if count < 0 { "-" } else { "" };
    let abs = count.unsigned_abs();
    if abs >= 1_000_000 {
        format!("{}{:.2}M", sign, abs as f64 / 1_000_000.0)
    } else if abs >= 10_000 {
        format!("{}{:.1}k", sign, abs as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// Count with grouped thousands for headline totals: `1,234,567`
pub fn format_big_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn summary(engine: &ReportEngine, now: u64) -> ReportSummary {
    ReportSummary {
        liveness: engine.liveness(now),
        last_update: engine.last_update(),
        total_files: engine.total_files(),
        total_executions: engine.total_executions(),
        global_max: engine.global_max(),
        diff_active: engine.diff().is_active(),
    }
}

/// Visible tree rows in display order
pub fn tree_rows(engine: &ReportEngine) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    let selected = engine.selected();
    for &root in engine.tree().roots() {
        push_rows(engine, root, 0, selected, &mut rows);
    }
    rows
}

fn push_rows(
    engine: &ReportEngine,
    id: NodeId,
    level: usize,
    selected: Option<NodeId>,
    rows: &mut Vec<TreeRow>,
) {
    let Some(node) = engine.tree().node(id) else {
        return;
    };
    let collapsed = engine.is_collapsed(id);
    rows.push(TreeRow {
        name: node.name.clone(),
        path: node.path.clone(),
        level,
        is_dir: node.is_dir(),
        total_count: node.total_count,
        badge: engine.badge(id),
        flash: node.flash,
        collapsed,
        selected: selected == Some(id),
    });
    if !collapsed {
        for &child in node.children() {
            push_rows(engine, child, level + 1, selected, rows);
        }
    }
}

/// Render the report as text output
pub fn render_text(engine: &ReportEngine, now: u64) -> String {
    let mut output = String::new();
    let summary = summary(engine, now);

    output.push_str(&format!(
        "{:<8} files: {:<6} executions: {}{}\n",
        summary.liveness,
        summary.total_files,
        format_big_count(summary.total_executions),
        if summary.diff_active { "  [diff]" } else { "" },
    ));

    for row in tree_rows(engine) {
        let marker = match (row.is_dir, row.collapsed) {
            (true, true) => "+ ",
            (true, false) => "- ",
            (false, _) if row.selected => "> ",
            (false, _) => "  ",
        };
        let label = format!("{}{}{}", "  ".repeat(row.level), marker, row.name);
        let badge = row.badge.map(format_count).unwrap_or_default();
        let flash = if row.flash { " *" } else { "" };
        output.push_str(&format!("{:<50} {:>8}{}\n", label, badge, flash));
    }

    output
}

/// Render a file's annotated source as text output
///
/// Empty when `id` does not belong to the engine's current tree.
pub fn render_source(engine: &ReportEngine, id: NodeId) -> String {
    let mut output = String::new();
    let (Some(node), Some(lines)) = (engine.tree().node(id), engine.annotated_source(id)) else {
        return output;
    };
    output.push_str(&format!("{}\n", node.path));

    for line in lines {
        let count = if line.count != 0 {
            line.count.to_string()
        } else {
            String::new()
        };
        let heat = line
            .color
            .map(|c| format!("{:>3.0}", c.hue))
            .unwrap_or_else(|| "   ".to_string());
        output.push_str(&format!(
            "{:>5} {:>8} {} | {}\n",
            line.number, count, heat, line.text
        ));
    }

    output
}

/// Render the report as JSON output
pub fn render_json(engine: &ReportEngine, now: u64) -> Result<String> {
    let selected = engine.selected().and_then(|id| {
        let node = engine.tree().node(id)?;
        Some(SelectedView {
            path: node.path.as_str(),
            fragment: crate::selection::fragment_for(&node.path),
            lines: engine.annotated_source(id)?,
        })
    });
    let view = ReportView {
        summary: summary(engine, now),
        rows: tree_rows(engine),
        selected,
    };
    serde_json::to_string_pretty(&view).context("failed to serialize report view")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use crate::payload::{FileRecord, ReportPayload};
    use crate::storage::Preferences;

    fn engine() -> ReportEngine {
        let mut engine = ReportEngine::new(EngineOptions::default(), Preferences::default());
        engine.load_payload(
            ReportPayload::new(
                1,
                vec![
                    FileRecord::new(Some("p"), "io/github/x/A.java", &[(1, 12_345)], "a"),
                    FileRecord::new(Some("p"), "io/github/x/B.java", &[(1, 2)], "b\nc"),
                ],
            ),
            0,
            1,
        );
        engine
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(9_999), "9999");
        assert_eq!(format_count(12_345), "12.3k");
        assert_eq!(format_count(1_234_567), "1.23M");
        assert_eq!(format_count(-12_345), "-12.3k");
        assert_eq!(format_count(-5), "-5");
    }

    #[test]
    fn test_format_big_count() {
        assert_eq!(format_big_count(0), "0");
        assert_eq!(format_big_count(999), "999");
        assert_eq!(format_big_count(1_000), "1,000");
        assert_eq!(format_big_count(1_234_567), "1,234,567");
    }

    #[test]
    fn test_rows_follow_display_order() {
        let engine = engine();
        let rows = tree_rows(&engine);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["p", "io.github.x", "A.java", "B.java"]);
        assert_eq!(rows[1].level, 1);
        assert_eq!(rows[2].level, 2);
        assert_eq!(rows[0].badge, Some(12_347));
    }

    #[test]
    fn test_collapsed_folder_hides_children() {
        let mut engine = engine();
        engine.toggle_folder("p/io/github/x");
        let rows = tree_rows(&engine);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].collapsed);

        let text = render_text(&engine, 1);
        assert!(text.contains("+ io.github.x"));
        assert!(!text.contains("A.java"));
    }

    #[test]
    fn test_render_text_summary() {
        let engine = engine();
        let text = render_text(&engine, 1);
        let header = text.lines().next().unwrap();
        assert!(header.starts_with("Live"));
        assert!(header.contains("executions: 12,347"));
        assert!(text.contains("12.3k"));
    }

    #[test]
    fn test_render_source() {
        let engine = engine();
        let id = engine.tree().find_by_path("p/io/github/x/B.java").unwrap();
        let text = render_source(&engine, id);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "p/io/github/x/B.java");
        assert!(lines[1].contains("2") && lines[1].ends_with("| b"));
        assert!(lines[2].ends_with("| c"));
    }

    #[test]
    fn test_render_json_includes_selection() {
        let mut engine = engine();
        engine.select("p/io/github/x/A.java");
        let json = render_json(&engine, 1).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["liveness"], "live");
        assert_eq!(value["summary"]["total_files"], 2);
        assert_eq!(
            value["selected"]["fragment"],
            "#p%2Fio%2Fgithub%2Fx%2FA.java"
        );
        assert_eq!(value["selected"]["lines"][0]["count"], 12_345);
        assert_eq!(value["rows"][2]["selected"], true);
    }
}
