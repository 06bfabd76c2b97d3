//! Persisted workspace setting: the only state that outlives a session.
//!
//! Stored as `{"workspace": "..."}` in the platform config directory:
//!   macOS:   ~/Library/Application Support/emoji-snip/settings.json
//!   Linux:   ~/.config/emoji-snip/settings.json
//!   Windows: %APPDATA%/emoji-snip/settings.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, SettingsError>;
    fn store(&self, settings: &Settings) -> Result<(), SettingsError>;

    /// The configured workspace, if any.
    fn workspace(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.load()?.workspace)
    }

    /// Trim and persist a workspace name. Empty input is rejected.
    fn save_workspace(&self, workspace: &str) -> Result<(), SettingsError> {
        let workspace = workspace.trim();
        if workspace.is_empty() {
            return Err(SettingsError::EmptyWorkspace);
        }

        let mut settings = self.load()?;
        settings.workspace = Some(workspace.to_string());
        self.store(&settings)?;
        log::info!("[SETTINGS] Workspace set to '{}'", workspace);
        Ok(())
    }
}

/// Base directory for emoji-snip files.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emoji-snip")
}

/// JSON file store.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under `config_dir()`.
    pub fn default_location() -> Self {
        Self::new(config_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory store for sessions that should not touch disk.
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
}

impl MemorySettingsStore {
    pub fn with_workspace(workspace: &str) -> Self {
        Self {
            settings: Mutex::new(Settings {
                workspace: Some(workspace.to_string()),
            }),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|e| SettingsError::Poisoned(e.to_string()))
    }

    fn store(&self, settings: &Settings) -> Result<(), SettingsError> {
        let mut guard = self
            .settings
            .lock()
            .map_err(|e| SettingsError::Poisoned(e.to_string()))?;
        *guard = settings.clone();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Enter a workspace name")]
    EmptyWorkspace,

    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings lock poisoned: {0}")]
    Poisoned(String),
}
