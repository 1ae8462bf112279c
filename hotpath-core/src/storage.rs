//! Persisted client preferences
//!
//! Preferences survive restarts through a `PreferenceStore`. Every store
//! access may fail (missing permissions, full disk, corrupt file); failures
//! are logged and the in-memory value stays authoritative for the session.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const THEME_KEY: &str = "theme";
pub const SHOW_ALL_KEY: &str = "showAllSources";
pub const SHOW_AGGREGATES_KEY: &str = "showAggregates";
pub const COLLAPSED_KEY: &str = "collapsedFolders";
pub const SIDEBAR_WIDTH_KEY: &str = "sidebarWidth";

pub const DEFAULT_SIDEBAR_WIDTH: u32 = 300;
pub const MIN_SIDEBAR_WIDTH: u32 = 200;
pub const MAX_SIDEBAR_WIDTH: u32 = 800;

/// String key/value backend for preferences
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Volatile store, used when nothing should touch disk
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object on disk, rewritten atomically on every change
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file: {}", self.path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("failed to parse state file: {}", self.path.display()))
    }
}

impl PreferenceStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}

impl FileStore {
    /// Replace the state file in one rename so readers never see a partial map
    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create state directory: {}", dir.display()))?;

        let mut staged = self.path.clone().into_os_string();
        staged.push(format!(".{}.partial", std::process::id()));
        let staged = PathBuf::from(staged);

        let written = std::fs::File::create(&staged)
            .map_err(anyhow::Error::from)
            .and_then(|file| {
                let mut out = std::io::BufWriter::new(file);
                serde_json::to_writer_pretty(&mut out, values)?;
                let file = out.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
                Ok(())
            })
            .and_then(|()| std::fs::rename(&staged, &self.path).map_err(anyhow::Error::from));
        if written.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        written.with_context(|| format!("failed to save state file: {}", self.path.display()))
    }
}

/// Color theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    /// Anything other than `"light"` is dark
    pub fn parse(value: &str) -> Self {
        if value == "light" {
            Theme::Light
        } else {
            Theme::Dark
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

/// In-memory preferences backed by a fallible store
pub struct Preferences {
    store: Box<dyn PreferenceStore>,
    theme: Theme,
    show_all: bool,
    show_aggregates: bool,
    collapsed: BTreeSet<String>,
    sidebar_width: u32,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("theme", &self.theme)
            .field("show_all", &self.show_all)
            .field("show_aggregates", &self.show_aggregates)
            .field("collapsed", &self.collapsed)
            .field("sidebar_width", &self.sidebar_width)
            .finish()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::load(Box::new(MemoryStore::default()))
    }
}

impl Preferences {
    /// Read every preference, falling back to defaults on any failure
    pub fn load(store: Box<dyn PreferenceStore>) -> Self {
        let read = |key: &str| -> Option<String> {
            match store.get(key) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key, "failed to read preference: {:#}", e);
                    None
                }
            }
        };

        let theme = read(THEME_KEY)
            .map(|v| Theme::parse(&v))
            .unwrap_or_default();
        let show_all = read(SHOW_ALL_KEY).is_some_and(|v| v == "true");
        let show_aggregates = read(SHOW_AGGREGATES_KEY).map_or(true, |v| v != "false");
        let collapsed = read(COLLAPSED_KEY)
            .and_then(|v| match serde_json::from_str::<Vec<String>>(&v) {
                Ok(paths) => Some(paths.into_iter().collect()),
                Err(e) => {
                    tracing::warn!("ignoring malformed collapsed folder list: {}", e);
                    None
                }
            })
            .unwrap_or_default();
        let sidebar_width = read(SIDEBAR_WIDTH_KEY)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(clamp_sidebar_width)
            .unwrap_or(DEFAULT_SIDEBAR_WIDTH);

        Preferences {
            store,
            theme,
            show_all,
            show_aggregates,
            collapsed,
            sidebar_width,
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn show_all(&self) -> bool {
        self.show_all
    }

    pub fn show_aggregates(&self) -> bool {
        self.show_aggregates
    }

    pub fn sidebar_width(&self) -> u32 {
        self.sidebar_width
    }

    pub fn is_collapsed(&self, path: &str) -> bool {
        self.collapsed.contains(path)
    }

    pub fn collapsed(&self) -> &BTreeSet<String> {
        &self.collapsed
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.persist(THEME_KEY, self.theme.as_str());
        self.theme
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.show_all = show_all;
        self.persist(SHOW_ALL_KEY, &show_all.to_string());
    }

    pub fn set_show_aggregates(&mut self, show_aggregates: bool) {
        self.show_aggregates = show_aggregates;
        self.persist(SHOW_AGGREGATES_KEY, &show_aggregates.to_string());
    }

    /// Flip a folder's collapsed flag; returns true when it is now collapsed
    pub fn toggle_collapsed(&mut self, path: &str) -> bool {
        let collapsed = if self.collapsed.remove(path) {
            false
        } else {
            self.collapsed.insert(path.to_string());
            true
        };
        let paths: Vec<&String> = self.collapsed.iter().collect();
        match serde_json::to_string(&paths) {
            Ok(json) => self.persist(COLLAPSED_KEY, &json),
            Err(e) => tracing::warn!("failed to serialize collapsed folders: {}", e),
        }
        collapsed
    }

    /// Store a new sidebar width, clamped to the allowed range
    pub fn set_sidebar_width(&mut self, width: u32) -> u32 {
        self.sidebar_width = clamp_sidebar_width(width);
        self.persist(SIDEBAR_WIDTH_KEY, &self.sidebar_width.to_string());
        self.sidebar_width
    }

    fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!(key, "failed to persist preference: {:#}", e);
        }
    }
}

fn clamp_sidebar_width(width: u32) -> u32 {
    width.clamp(MIN_SIDEBAR_WIDTH, MAX_SIDEBAR_WIDTH)
}
