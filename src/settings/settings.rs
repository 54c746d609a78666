// Settings loading and validation
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Deck behaviour profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Party,
    Hardcore,
}

/// Window layout handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    pub window_width: i32,
    pub window_height: i32,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            window_width: 1024,
            window_height: 768,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Normalized level applied to new sessions, 0.0 to 1.0
    pub initial_volume: f32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self { initial_volume: 1.0 }
    }
}

/// Main application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub version: i32, // Settings schema version for future migrations
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub mode: Mode,
    pub layout: LayoutSettings,
    pub playback: PlaybackSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: 1,
            database_path: PathBuf::from("music_library.db"),
            log_path: PathBuf::from("logs/megajam.log"),
            mode: Mode::default(),
            layout: LayoutSettings::default(),
            playback: PlaybackSettings::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from file, or return defaults if the file doesn't exist.
    /// Fields missing from the file take their default values.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: AppSettings = serde_json::from_str(&content).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.layout.window_width <= 0 || self.layout.window_height <= 0 {
            return Err(SettingsError::Invalid(format!(
                "window size {}x{} must be positive",
                self.layout.window_width, self.layout.window_height
            )));
        }
        if !(0.0..=1.0).contains(&self.playback.initial_volume) {
            return Err(SettingsError::Invalid(format!(
                "initial volume {} is outside [0.0, 1.0]",
                self.playback.initial_volume
            )));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(SettingsError::Invalid("database path is empty".to_string()));
        }
        Ok(())
    }
}
