//! Editor configuration: size ceiling, emoji edge, workspace host and the
//! default export settings.
//!
//! Loaded from `<config_dir>/emoji-snip/config.json` (written with defaults on
//! first run), then overridden by `EMOJI_SNIP_*` environment variables.

use crate::editor::chroma::{ChromaKeySettings, Rgb};
use crate::editor::gif::GifExportSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard ceiling most chat workspaces put on custom emoji uploads.
pub const DEFAULT_MAX_BYTES: usize = 128 * 1024;

/// Edge length of the square image emoji.
pub const DEFAULT_EMOJI_EDGE: u32 = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub max_bytes: usize,
    pub emoji_edge: u32,
    /// The workspace page is `https://<workspace>.<host>/customize/emoji`.
    pub workspace_host: String,
    /// How long the editor stays open after the upload flow finishes.
    pub close_delay_ms: u64,
    /// Where exports are written. `None` means the platform download dir.
    pub output_dir: Option<PathBuf>,
    pub gif: GifExportSettings,
    pub chroma: ChromaKeySettings,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            emoji_edge: DEFAULT_EMOJI_EDGE,
            workspace_host: "slack.com".to_string(),
            close_delay_ms: 5000,
            output_dir: None,
            gif: GifExportSettings::default(),
            chroma: ChromaKeySettings {
                enabled: false,
                color: Rgb::new(0, 255, 0),
                sensitivity: 30.0,
            },
        }
    }
}

impl EditorConfig {
    /// Load from `dir/config.json`, creating it with defaults if missing.
    /// An unreadable file falls back to defaults.
    pub fn load(dir: &Path) -> Self {
        let config_path = dir.join("config.json");
        let mut config = if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("[CONFIG] Ignoring invalid {}: {}", config_path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("[CONFIG] Cannot read {}: {}", config_path.display(), e);
                    Self::default()
                }
            }
        } else {
            let c = Self::default();
            if let Err(e) = c.save(dir) {
                log::warn!("[CONFIG] Could not write default config: {}", e);
            }
            c
        };

        config.apply_env();
        config
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join("config.json"), content)
    }

    /// Environment overrides; unparsable values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("EMOJI_SNIP_MAX_BYTES") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.max_bytes = n,
                _ => log::warn!("[CONFIG] Ignoring EMOJI_SNIP_MAX_BYTES={}", raw),
            }
        }
        if let Ok(host) = std::env::var("EMOJI_SNIP_WORKSPACE_HOST") {
            if !host.trim().is_empty() {
                self.workspace_host = host.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("EMOJI_SNIP_OUTPUT_DIR") {
            if !dir.is_empty() {
                self.output_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Directory exports are saved into.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
