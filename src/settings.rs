use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct AppSettings {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub block_size: Option<u32>,
    pub input_latency_compensation_ms: f32,
    /// Minimum reverb output peak relative to the input peak, in [0, 1].
    pub normalization_floor: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: Some(44_100),
            block_size: Some(2048),
            input_latency_compensation_ms: 5.0, // Default to 5ms safety buffer
            normalization_floor: 0.85,
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "gestloop")?;
    let config_dir = dirs.config_dir().to_path_buf();
    for dir in [&config_dir, &config_dir.join("Loops")] {
        if !dir.exists() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("failed to create directory {}: {e}", dir.display());
                return None;
            }
        }
    }
    Some(config_dir)
}

/// Where exported loops land by default.
pub fn exports_dir() -> Option<PathBuf> {
    Some(get_config_dir()?.join("Loops"))
}

pub fn save_settings(settings: &AppSettings) {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        match serde_json::to_string_pretty(settings) {
            Ok(json_string) => {
                if let Err(e) = fs::write(&path, json_string) {
                    warn!("failed to write settings to {}: {e}", path.display());
                }
            }
            Err(e) => {
                warn!("failed to serialize settings: {e}");
            }
        }
    }
}

pub fn load_settings() -> AppSettings {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        if path.exists() {
            return match fs::read_to_string(&path) {
                Ok(json_string) => match serde_json::from_str(&json_string) {
                    Ok(settings) => settings,
                    Err(e) => {
                        warn!("failed to parse settings file, using defaults: {e}");
                        AppSettings::default()
                    }
                },
                Err(e) => {
                    warn!("failed to read settings file, using defaults: {e}");
                    AppSettings::default()
                }
            };
        }
    }
    AppSettings::default()
}
