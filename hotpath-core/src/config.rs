//! Configuration file support for Hotpath
//!
//! Loads report-directory configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.hotpathrc.json` in the report directory
//! 3. `hotpath.config.json` in the report directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::flash::FLASH_MS;
use crate::freshness::{offline_timeout, POLL_INTERVAL_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_JSON_FILE: &str = "execution-report.json";
pub const DEFAULT_SCRIPT_FILE: &str = "execution-report.js";
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_STATE_FILE: &str = ".hotpath/state.json";

/// Hotpath configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotpathConfig {
    /// Plain JSON report file (default: execution-report.json)
    #[serde(default)]
    pub json_file: Option<String>,

    /// Script-wrapped report file (default: execution-report.js)
    #[serde(default)]
    pub script_file: Option<String>,

    /// Poll cadence in milliseconds (default: 2000)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Timeout for one script transport attempt (default: 1500)
    #[serde(default)]
    pub script_timeout_ms: Option<u64>,

    /// How long an increased file stays flashed (default: 1000)
    #[serde(default)]
    pub flash_ms: Option<u64>,

    /// Preference file, relative to the report directory (default: .hotpath/state.json)
    #[serde(default)]
    pub state_file: Option<String>,
}

/// Configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub json_file: String,
    pub script_file: String,
    pub poll_interval_ms: u64,
    pub script_timeout_ms: u64,
    pub flash_ms: u64,
    pub state_file: String,
    /// Derived: max(6000, 3 * poll interval)
    pub offline_timeout_ms: u64,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl HotpathConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        let poll = self.poll_interval_ms.unwrap_or(POLL_INTERVAL_MS);
        let script_timeout = self.script_timeout_ms.unwrap_or(DEFAULT_SCRIPT_TIMEOUT_MS);

        for (name, val) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("script_timeout_ms", self.script_timeout_ms),
            ("flash_ms", self.flash_ms),
        ] {
            if val == Some(0) {
                anyhow::bail!("{} must be positive (got 0)", name);
            }
        }

        if script_timeout >= poll {
            anyhow::bail!(
                "script_timeout_ms ({}) must be less than poll_interval_ms ({})",
                script_timeout,
                poll
            );
        }

        for (name, val) in [
            ("json_file", &self.json_file),
            ("script_file", &self.script_file),
            ("state_file", &self.state_file),
        ] {
            if let Some(v) = val {
                if v.trim().is_empty() {
                    anyhow::bail!("{} must not be empty", name);
                }
            }
        }

        Ok(())
    }

    /// Resolve config into its final form
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let poll_interval_ms = self.poll_interval_ms.unwrap_or(POLL_INTERVAL_MS);
        Ok(ResolvedConfig {
            json_file: self
                .json_file
                .clone()
                .unwrap_or_else(|| DEFAULT_JSON_FILE.to_string()),
            script_file: self
                .script_file
                .clone()
                .unwrap_or_else(|| DEFAULT_SCRIPT_FILE.to_string()),
            poll_interval_ms,
            script_timeout_ms: self.script_timeout_ms.unwrap_or(DEFAULT_SCRIPT_TIMEOUT_MS),
            flash_ms: self.flash_ms.unwrap_or(FLASH_MS),
            state_file: self
                .state_file
                .clone()
                .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
            offline_timeout_ms: offline_timeout(poll_interval_ms),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        HotpathConfig::default().resolve()
    }

    /// Override the poll interval, re-deriving the offline timeout
    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Result<Self> {
        if poll_interval_ms == 0 {
            anyhow::bail!("poll interval must be positive (got 0)");
        }
        if self.script_timeout_ms >= poll_interval_ms {
            anyhow::bail!(
                "poll interval ({}) must be greater than the script timeout ({})",
                poll_interval_ms,
                self.script_timeout_ms
            );
        }
        self.poll_interval_ms = poll_interval_ms;
        self.offline_timeout_ms = offline_timeout(poll_interval_ms);
        Ok(self)
    }

    pub fn json_path(&self, report_dir: &Path) -> PathBuf {
        report_dir.join(&self.json_file)
    }

    pub fn script_path(&self, report_dir: &Path) -> PathBuf {
        report_dir.join(&self.script_file)
    }

    pub fn state_path(&self, report_dir: &Path) -> PathBuf {
        report_dir.join(&self.state_file)
    }
}

/// Discover and load a config file from the report directory
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(report_dir: &Path) -> Result<Option<(HotpathConfig, PathBuf)>> {
    for name in [".hotpathrc.json", "hotpath.config.json"] {
        let path = report_dir.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<HotpathConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: HotpathConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a report directory
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in the report directory.
/// Returns default config if nothing is found.
pub fn load_and_resolve(report_dir: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(report_dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (HotpathConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = HotpathConfig::default();
        config.validate().expect("default config should be valid");
        let resolved = config.resolve().expect("default config should resolve");
        assert_eq!(resolved.json_file, "execution-report.json");
        assert_eq!(resolved.script_file, "execution-report.js");
        assert_eq!(resolved.poll_interval_ms, 2000);
        assert_eq!(resolved.script_timeout_ms, 1500);
        assert_eq!(resolved.flash_ms, 1000);
        assert_eq!(resolved.offline_timeout_ms, 6000);
        assert_eq!(resolved.state_file, ".hotpath/state.json");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "json_file": "report.json",
            "script_file": "report.js",
            "poll_interval_ms": 5000,
            "script_timeout_ms": 2500,
            "flash_ms": 800,
            "state_file": "prefs.json"
        }"#;
        let config: HotpathConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.json_file, "report.json");
        assert_eq!(resolved.script_file, "report.js");
        assert_eq!(resolved.poll_interval_ms, 5000);
        assert_eq!(resolved.script_timeout_ms, 2500);
        assert_eq!(resolved.flash_ms, 800);
        assert_eq!(resolved.offline_timeout_ms, 15000);
        assert_eq!(resolved.state_file, "prefs.json");
    }

    #[test]
    fn test_reject_unknown_fields() {
        let json = r#"{"unknown_field": true}"#;
        let result: Result<HotpathConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_zero_interval() {
        let config = HotpathConfig {
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HotpathConfig {
            flash_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_script_timeout_not_shorter_than_poll() {
        let json = r#"{"poll_interval_ms": 1000}"#;
        let config: HotpathConfig = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("script_timeout_ms"));
    }

    #[test]
    fn test_reject_empty_file_name() {
        let json = r#"{"json_file": "  "}"#;
        let config: HotpathConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_override_rederives_timeout() {
        let resolved = ResolvedConfig::defaults()
            .unwrap()
            .with_poll_interval(4000)
            .unwrap();
        assert_eq!(resolved.offline_timeout_ms, 12000);
        assert!(ResolvedConfig::defaults()
            .unwrap()
            .with_poll_interval(1000)
            .is_err());
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join(".hotpathrc.json"), r#"{"flash_ms": 700}"#).unwrap();
        fs::write(
            dir.path().join("hotpath.config.json"),
            r#"{"flash_ms": 900}"#,
        )
        .unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.flash_ms, Some(700), ".hotpathrc.json should take priority");
        assert!(path.ends_with(".hotpathrc.json"));
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(&config_path, r#"{"json_file": "out.json"}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.json_file, "out.json");
        assert_eq!(resolved.config_path, Some(config_path));
        assert_eq!(resolved.json_path(dir.path()), dir.path().join("out.json"));
    }

    #[test]
    fn test_invalid_config_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".hotpathrc.json");
        fs::write(&config_path, r#"{"poll_interval_ms": 0}"#).unwrap();

        let err = load_and_resolve(dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains(".hotpathrc.json"));
    }
}
