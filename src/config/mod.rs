//! Configuration for the VisionSim core
//!
//! Two persisted documents, both in the platform data directory:
//!
//! - `simulator.toml` ([`SimConfig`]) - the simulator settings the loop
//!   reads at startup and writes back on destroy (target rate, theme,
//!   preferred source/pipeline)
//! - `app_state.json` ([`AppState`]) - launcher-level state (run count,
//!   last run timestamp)
//!
//! # App Data Location
//!
//! - **Linux**: `~/.local/share/org.visionsim.visionsim-rs/`
//! - **macOS**: `~/Library/Application Support/org.visionsim.visionsim-rs/`
//! - **Windows**: `%APPDATA%\org.visionsim.visionsim-rs\`
//!
//! The loop itself only depends on the [`ConfigStore`] trait: `load()` once
//! at startup, `save()` once per destroy. [`FileConfigStore`] is the
//! file-backed implementation; tests substitute mocks or in-memory stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};

/// Application identifier for data directories
pub const APP_ID: &str = "org.visionsim.visionsim-rs";

/// Simulator config filename
pub const CONFIG_FILE: &str = "simulator.toml";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Default main-loop target rate
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Presentation theme handed to the sink at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Theme {
    /// Light widget theme
    Light,
    /// Dark widget theme
    #[default]
    Dark,
}

/// Persisted simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Target main-loop rate in ticks per second
    pub target_fps: u32,
    /// Presentation theme
    pub theme: Theme,
    /// Name of the source to select at startup, when registered
    pub preferred_source: Option<String>,
    /// Name of the pipeline to select at startup, when registered
    pub preferred_pipeline: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            theme: Theme::default(),
            preferred_source: None,
            preferred_pipeline: None,
        }
    }
}

/// Launcher-level application state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    /// How many times the simulator has been launched
    pub run_count: u64,
    /// When the simulator was last launched
    pub last_run: Option<DateTime<Utc>>,
}

impl AppState {
    /// Load the app state, falling back to defaults on any failure
    pub fn load_or_default() -> Self {
        let Some(path) = app_state_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Record a launch happening now
    pub fn record_run(&mut self) {
        self.run_count += 1;
        self.last_run = Some(Utc::now());
    }

    /// Save the app state to its default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SimError::Serialization(e.to_string()))?;
        std::fs::write(dir.join(APP_STATE_FILE), contents)?;
        Ok(())
    }
}

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| SimError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            SimError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the app state file
pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

/// Boundary for configuration persistence.
///
/// Called exactly once at startup and once per destroy; the destroy-time
/// save is best-effort, so implementations should report failures rather
/// than panic.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send {
    /// Load the persisted configuration
    fn load(&self) -> Result<SimConfig>;

    /// Persist the configuration
    fn save(&self, config: &SimConfig) -> Result<()>;
}

/// TOML-file-backed [`ConfigStore`]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Store backed by an explicit file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by the default location in the app data directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(ensure_app_data_dir()?.join(CONFIG_FILE)))
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    /// A missing file is a first run, not an error
    fn load(&self) -> Result<SimConfig> {
        if !self.path.exists() {
            tracing::info!("No config at {}, using defaults", self.path.display());
            return Ok(SimConfig::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        toml::from_str(&contents).map_err(|e| SimError::Serialization(e.to_string()))
    }

    fn save(&self, config: &SimConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(config).map_err(|e| SimError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.target_fps, DEFAULT_TARGET_FPS);
        assert_eq!(config.theme, Theme::Dark);
        assert!(config.preferred_source.is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("simulator.toml"));

        let mut config = SimConfig::default();
        config.target_fps = 60;
        config.theme = Theme::Light;
        config.preferred_pipeline = Some("ThresholdPipeline".to_string());

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("nope.toml"));
        assert_eq!(store.load().unwrap(), SimConfig::default());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulator.toml");
        std::fs::write(&path, "target_fps = \"not a number\"").unwrap();

        let store = FileConfigStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulator.toml");
        std::fs::write(&path, "target_fps = 15").unwrap();

        let store = FileConfigStore::new(path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.target_fps, 15);
        assert_eq!(loaded.theme, Theme::Dark);
    }

    #[test]
    fn test_app_state_record_run() {
        let mut state = AppState::default();
        assert_eq!(state.run_count, 0);
        state.record_run();
        assert_eq!(state.run_count, 1);
        assert!(state.last_run.is_some());
    }
}
