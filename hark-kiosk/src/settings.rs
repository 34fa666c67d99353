//! Persistent kiosk settings (JSON file in the app data directory).
//!
//! The capture fields sit at the top level of the file next to the host-only
//! keys, so a settings file reads like:
//!
//! ```json
//! { "sampleRateHz": 16000, "frameDurationS": 0.5, "modelPath": "/opt/hark/silero_vad.onnx" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hark_core::{vad::LoadPolicy, CaptureConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILTER: &str = "hark=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct KioskSettings {
    #[serde(flatten)]
    pub capture: CaptureConfig,
    /// Silero VAD model file. `None` uses the platform models directory.
    pub model_path: Option<PathBuf>,
    /// Where finished utterances are written. `None` uses the data directory.
    pub output_dir: Option<PathBuf>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub model_load_attempts: u32,
    pub model_retry_delay_ms: u64,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            model_path: None,
            output_dir: None,
            log_filter: None,
            model_load_attempts: 3,
            model_retry_delay_ms: 250,
        }
    }
}

impl KioskSettings {
    pub fn normalize(&mut self) {
        self.capture.device_id = trimmed(self.capture.device_id.take());
        self.log_filter = trimmed(self.log_filter.take());
        self.model_path = self.model_path.take().filter(|p| !p.as_os_str().is_empty());
        self.output_dir = self.output_dir.take().filter(|p| !p.as_os_str().is_empty());
        self.model_load_attempts = self.model_load_attempts.clamp(1, 10);
        self.model_retry_delay_ms = self.model_retry_delay_ms.min(5_000);
    }

    /// `HARK_MODEL_PATH`, `HARK_OUTPUT_DIR` and `HARK_DEVICE` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = std::env::var_os("HARK_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = std::env::var_os("HARK_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Ok(device) = std::env::var("HARK_DEVICE") {
            self.capture.device_id = trimmed(Some(device));
        }
    }

    pub fn load_policy(&self) -> LoadPolicy {
        LoadPolicy {
            max_attempts: self.model_load_attempts,
            retry_delay: Duration::from_millis(self.model_retry_delay_ms),
        }
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("utterances"))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Hark")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("hark")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Read and normalise settings; a missing or unreadable file yields defaults.
pub fn load_settings(path: &Path) -> KioskSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<KioskSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &KioskSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

/// Write `settings` to `path` when no file exists there yet.
///
/// Returns whether a file was written. Existing files are never touched.
pub fn write_defaults_if_missing(path: &Path, settings: &KioskSettings) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_settings(path, settings)?;
    Ok(true)
}
