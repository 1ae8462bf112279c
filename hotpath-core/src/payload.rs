//! Report payload model and normalization
//!
//! Accepts every shape a report producer has ever emitted and normalizes it
//! into a single `ReportPayload`.
//!
//! Global invariants enforced:
//! - A bare array of files is a legacy payload with `generated_at = 0`
//! - Unrecognized shapes normalize to an empty payload, never a panic
//! - A missing or blank project is reported as `"unknown"`

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project name used when a record carries none
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Per-file execution counts as produced by the instrumentation agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// 1-based line number to hit count; absent lines were never executed
    #[serde(default)]
    pub counts: BTreeMap<u32, u64>,
    #[serde(default)]
    pub content: String,
}

impl FileRecord {
    pub fn new(project: Option<&str>, path: &str, counts: &[(u32, u64)], content: &str) -> Self {
        FileRecord {
            path: path.to_string(),
            project: project.map(str::to_string),
            counts: counts.iter().copied().collect(),
            content: content.to_string(),
        }
    }

    /// Project name with the `"unknown"` fallback applied
    pub fn project_name(&self) -> &str {
        project_or_unknown(self.project.as_deref())
    }

    /// Sum of all line counts
    pub fn total_count(&self) -> u64 {
        self.counts.values().sum()
    }

    /// True when at least one line was executed
    pub fn is_hotpath(&self) -> bool {
        self.counts.values().any(|&c| c > 0)
    }

    /// Source split into display lines (`\n` or `\r\n`)
    pub fn lines(&self) -> Vec<String> {
        split_lines(&self.content)
    }

    /// Highest single-line count in this file
    pub fn max_line_count(&self) -> u64 {
        self.counts.values().copied().max().unwrap_or(0)
    }
}

/// A versioned set of file records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(default)]
    pub generated_at: u64,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl ReportPayload {
    pub fn new(generated_at: u64, files: Vec<FileRecord>) -> Self {
        ReportPayload {
            generated_at,
            files,
        }
    }

    /// Parse any accepted payload shape from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("failed to parse report payload JSON")?;
        Self::from_value(value)
    }

    /// Parse a script-wrapped payload (`window.loadExecutionData(<json>);`)
    ///
    /// Plain JSON is accepted as well, so callers need not know which form
    /// the producer wrote.
    pub fn from_script(script: &str) -> Result<Self> {
        match unwrap_script(script) {
            Some(json) => Self::from_json(json).context("failed to parse script-wrapped payload"),
            None => Self::from_json(script),
        }
    }

    /// Normalize an already-parsed JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Array(_) => {
                let files: Vec<FileRecord> =
                    serde_json::from_value(value).context("invalid file records in legacy payload")?;
                Ok(ReportPayload::new(0, files))
            }
            serde_json::Value::Object(ref map) if map.get("files").is_some_and(|f| f.is_array()) => {
                let generated_at = map
                    .get("generatedAt")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);
                let files: Vec<FileRecord> = serde_json::from_value(map["files"].clone())
                    .context("invalid file records in report payload")?;
                Ok(ReportPayload::new(generated_at, files))
            }
            _ => Ok(ReportPayload::default()),
        }
    }

    /// Serialize payload to JSON (envelope form)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize report payload")
    }

    /// Highest single-line count across all files (at least 1)
    pub fn global_max(&self) -> u64 {
        global_max(&self.files)
    }

    /// Sum of every count in every file
    pub fn total_executions(&self) -> u64 {
        self.files.iter().map(FileRecord::total_count).sum()
    }
}

/// Highest single-line count across `files`, floored at 1
pub fn global_max(files: &[FileRecord]) -> u64 {
    files
        .iter()
        .map(FileRecord::max_line_count)
        .max()
        .unwrap_or(0)
        .max(1)
}

pub(crate) fn project_or_unknown(project: Option<&str>) -> &str {
    match project.map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => UNKNOWN_PROJECT,
    }
}

pub(crate) fn split_lines(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

fn unwrap_script(script: &str) -> Option<&str> {
    static SCRIPT_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = SCRIPT_RE.get_or_init(|| {
        Regex::new(
            r"(?s)^\s*(?:window\.loadExecutionData\s*&&\s*)?window\.loadExecutionData\s*\((.*)\)\s*;?\s*$",
        )
        .unwrap()
    });
    re.captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
