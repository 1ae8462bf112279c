//! Data sources and the single-flight poller
//!
//! A poll cycle tries the report's transports in priority order and stops
//! at the first one that yields a payload:
//!
//! 1. The script-wrapped report, cache-busted with the current time
//!    (every script attempt is bounded by the source's script timeout)
//! 2. For file-local reports whose first attempt did not advance
//!    `last_update`, the script report again without cache busting
//! 3. For served reports whose script attempts failed, the plain JSON report
//!
//! When every attempt fails the engine is told the poll failed and reports
//! Offline until a later poll succeeds.

use crate::config::{ResolvedConfig, DEFAULT_SCRIPT_TIMEOUT_MS};
use crate::engine::{LoadOutcome, ReportEngine};
use crate::payload::ReportPayload;
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Where report payloads come from
#[allow(async_fn_in_trait)]
pub trait ReportSource {
    /// True when the report is read straight off the local filesystem
    fn is_file_local(&self) -> bool;

    /// Upper bound on one script load
    fn script_timeout(&self) -> Duration {
        Duration::from_millis(DEFAULT_SCRIPT_TIMEOUT_MS)
    }

    /// Load the script-wrapped report; `cache_bust` is a version token
    async fn load_script(&self, cache_bust: Option<u64>) -> Result<ReportPayload>;

    /// Load the plain JSON report
    async fn load_json(&self) -> Result<ReportPayload>;
}

/// Report files in a directory on disk
#[derive(Debug, Clone)]
pub struct DirectorySource {
    script_path: PathBuf,
    json_path: PathBuf,
    script_timeout: Duration,
    file_local: bool,
}

impl DirectorySource {
    pub fn new(report_dir: &Path, config: &ResolvedConfig) -> Self {
        DirectorySource {
            script_path: config.script_path(report_dir),
            json_path: config.json_path(report_dir),
            script_timeout: Duration::from_millis(config.script_timeout_ms),
            file_local: false,
        }
    }

    /// Poll like a report opened from `file://` (no JSON fallback)
    pub fn file_local(mut self, file_local: bool) -> Self {
        self.file_local = file_local;
        self
    }
}

impl ReportSource for DirectorySource {
    fn is_file_local(&self) -> bool {
        self.file_local
    }

    fn script_timeout(&self) -> Duration {
        self.script_timeout
    }

    async fn load_script(&self, cache_bust: Option<u64>) -> Result<ReportPayload> {
        tracing::debug!(path = %self.script_path.display(), ?cache_bust, "loading script report");
        let script = tokio::fs::read_to_string(&self.script_path)
            .await
            .with_context(|| format!("failed to read {}", self.script_path.display()))?;
        ReportPayload::from_script(&script)
            .with_context(|| format!("invalid report in {}", self.script_path.display()))
    }

    async fn load_json(&self) -> Result<ReportPayload> {
        let json = tokio::fs::read_to_string(&self.json_path)
            .await
            .with_context(|| format!("failed to read {}", self.json_path.display()))?;
        ReportPayload::from_json(&json)
            .with_context(|| format!("invalid report in {}", self.json_path.display()))
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still in flight
    Skipped,
    /// A payload was loaded and applied
    Updated,
    /// A payload was loaded but was not newer
    Unchanged,
    /// Every transport failed
    Failed,
}

/// Polls a `ReportSource` into a `ReportEngine`, one cycle at a time
#[derive(Debug)]
pub struct Poller<S> {
    source: S,
    in_flight: Mutex<()>,
}

impl<S: ReportSource> Poller<S> {
    pub fn new(source: S) -> Self {
        Poller {
            source,
            in_flight: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run one poll cycle; a no-op while another cycle is in flight
    ///
    /// The engine is only borrowed between transport attempts, never across
    /// an await.
    pub async fn poll(&self, engine: &RefCell<ReportEngine>, clock: impl Fn() -> u64) -> PollOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("poll already in flight, skipping");
            return PollOutcome::Skipped;
        };

        let before = engine.borrow().last_update();
        let file_local = self.source.is_file_local();

        let mut loaded = self.attempt(engine, &clock, Transport::Script { bust: true }).await;
        let advanced = engine.borrow().last_update() > before;
        if !advanced && file_local {
            loaded = self.attempt(engine, &clock, Transport::Script { bust: false }).await;
        }
        if loaded.is_none() && !file_local {
            loaded = self.attempt(engine, &clock, Transport::Json).await;
        }

        let mut engine = engine.borrow_mut();
        match loaded {
            None => {
                tracing::warn!("every report transport failed");
                engine.record_poll_failure();
                PollOutcome::Failed
            }
            Some(outcome) => {
                engine.record_poll_success();
                if engine.last_update() > before || outcome.is_applied() {
                    PollOutcome::Updated
                } else {
                    PollOutcome::Unchanged
                }
            }
        }
    }

    async fn attempt(
        &self,
        engine: &RefCell<ReportEngine>,
        clock: &impl Fn() -> u64,
        transport: Transport,
    ) -> Option<LoadOutcome> {
        let result = match transport {
            Transport::Script { bust } => {
                let token = bust.then(clock);
                let timeout = self.source.script_timeout();
                match tokio::time::timeout(timeout, self.source.load_script(token)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "script report timed out after {}ms",
                        timeout.as_millis()
                    )),
                }
            }
            Transport::Json => self.source.load_json().await,
        };
        match result {
            Ok(payload) => Some(engine.borrow_mut().load_payload(payload, 0, clock())),
            Err(e) => {
                tracing::debug!(?transport, "report transport failed: {:#}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Transport {
    Script { bust: bool },
    Json,
}
