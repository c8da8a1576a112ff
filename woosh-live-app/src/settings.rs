//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use woosh_live_core::{engine::DEFAULT_MODEL, engine::DEFAULT_VOICE, LiveConfig, Role};

/// Prebuilt voices offered by the live service.
const KNOWN_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

pub const API_KEY_ENV: &str = "WOOSH_LIVE_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub role: Role,
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice: String,
    pub frame_size: usize,
    pub connect_timeout_secs: u64,
    /// Replaces the built-in café instruction when set.
    pub base_instruction: Option<String>,
    pub api_key: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            role: Role::Guest,
            preferred_input_device: None,
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            frame_size: 4096,
            connect_timeout_secs: 15,
            base_instruction: None,
            api_key: None,
        }
    }
}

/// What gets logged at startup: the settings minus secrets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub role: Role,
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice: String,
    pub frame_size: usize,
    pub connect_timeout_secs: u64,
    pub has_custom_instruction: bool,
    pub has_api_key: bool,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model = {
            let m = self.model.trim();
            if m.is_empty() {
                DEFAULT_MODEL.into()
            } else {
                m.into()
            }
        };
        self.voice = normalize_voice(&self.voice);
        self.frame_size = self.frame_size.clamp(256, 16_384);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(3, 120);
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.base_instruction = trimmed(self.base_instruction.take());
        self.api_key = trimmed(self.api_key.take());
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            role: self.role,
            preferred_input_device: self.preferred_input_device.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            frame_size: self.frame_size,
            connect_timeout_secs: self.connect_timeout_secs,
            has_custom_instruction: self.base_instruction.is_some(),
            has_api_key: self.api_key.is_some(),
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            frame_size: self.frame_size,
            model: self.model.clone(),
            voice: self.voice.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            preferred_input_device: self.preferred_input_device.clone(),
            ..LiveConfig::default()
        }
    }

    /// `WOOSH_LIVE_API_KEY`, then `GEMINI_API_KEY`, then the settings file.
    pub fn resolve_api_key(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        [API_KEY_ENV, FALLBACK_API_KEY_ENV]
            .into_iter()
            .find_map(|name| trimmed(env(name)))
            .or_else(|| self.api_key.clone())
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn normalize_voice(raw: &str) -> String {
    let wanted = raw.trim();
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(wanted))
        .copied()
        .unwrap_or(DEFAULT_VOICE)
        .to_string()
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Woosh Cafe")
            .join("Live")
            .join("settings.json")
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
            .join("woosh-live")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
