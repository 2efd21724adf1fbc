use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::streaming::protocol::{DEFAULT_TEMPLATE_ID, FLOW_API_URL};

const SETTINGS_DIR_NAME: &str = "flowchat";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Flow WebSocket endpoint, without query parameters.
    pub endpoint: String,

    /// Assistant template the conversation runs against.
    pub template_id: String,

    /// Initial playback speed for assistant audio (0.5 - 2.0).
    pub playback_speed: f32,

    /// Lifetime requested for temporary tokens minted with `--fetch-token`.
    pub token_ttl_secs: u64,

    /// Outbound audio frames buffered for the WebSocket writer before new
    /// frames are dropped.
    pub outbound_queue_frames: usize,

    /// Upper bound on the WebSocket handshake.
    pub connect_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            endpoint: FLOW_API_URL.to_string(),
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            playback_speed: 1.0,
            token_ttl_secs: 360,
            outbound_queue_frames: 64,
            connect_timeout_secs: 10,
        }
    }
}

/// `<config dir>/flowchat/settings.json`
pub fn default_settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from `path`, falling back to defaults if the file is
/// missing or unreadable.
pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write to a sibling temp file, then rename over the real one
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // Windows rename fails if the destination exists
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}
