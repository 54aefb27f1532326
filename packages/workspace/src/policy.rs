//! Save triggers, the per-trigger policy matrix, and host settings.
//!
//! Only manual saves and app-close saves are enabled by default so the engine
//! does not compete with a host's own focus and autosave handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Named condition that may request a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveTrigger {
    Blur,
    ManualSave,
    AppClose,
    ViewSwitch,
    FileClose,
    AutoSave,
}

impl SaveTrigger {
    pub const ALL: [SaveTrigger; 6] = [
        SaveTrigger::Blur,
        SaveTrigger::ManualSave,
        SaveTrigger::AppClose,
        SaveTrigger::ViewSwitch,
        SaveTrigger::FileClose,
        SaveTrigger::AutoSave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SaveTrigger::Blur => "blur",
            SaveTrigger::ManualSave => "manual-save",
            SaveTrigger::AppClose => "app-close",
            SaveTrigger::ViewSwitch => "view-switch",
            SaveTrigger::FileClose => "file-close",
            SaveTrigger::AutoSave => "auto-save",
        }
    }
}

impl fmt::Display for SaveTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which triggers are allowed to save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SavePolicy {
    pub blur: bool,
    pub manual_save: bool,
    pub app_close: bool,
    pub view_switch: bool,
    pub file_close: bool,
    pub auto_save: bool,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            blur: false,
            manual_save: true,
            app_close: true,
            view_switch: false,
            file_close: false,
            auto_save: false,
        }
    }
}

impl SavePolicy {
    /// Every trigger enabled
    pub fn all_enabled() -> Self {
        Self {
            blur: true,
            manual_save: true,
            app_close: true,
            view_switch: true,
            file_close: true,
            auto_save: true,
        }
    }

    pub fn is_enabled(&self, trigger: SaveTrigger) -> bool {
        match trigger {
            SaveTrigger::Blur => self.blur,
            SaveTrigger::ManualSave => self.manual_save,
            SaveTrigger::AppClose => self.app_close,
            SaveTrigger::ViewSwitch => self.view_switch,
            SaveTrigger::FileClose => self.file_close,
            SaveTrigger::AutoSave => self.auto_save,
        }
    }

    pub fn set(&mut self, trigger: SaveTrigger, enabled: bool) {
        let slot = match trigger {
            SaveTrigger::Blur => &mut self.blur,
            SaveTrigger::ManualSave => &mut self.manual_save,
            SaveTrigger::AppClose => &mut self.app_close,
            SaveTrigger::ViewSwitch => &mut self.view_switch,
            SaveTrigger::FileClose => &mut self.file_close,
            SaveTrigger::AutoSave => &mut self.auto_save,
        };
        *slot = enabled;
    }

    pub fn enabled_triggers(&self) -> Vec<SaveTrigger> {
        SaveTrigger::ALL
            .into_iter()
            .filter(|t| self.is_enabled(*t))
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Host-provided save settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SaveSettings {
    pub policy: SavePolicy,
    /// Debounce delay for the scheduled auto-save
    pub auto_save_delay_ms: u64,
    /// Ask the host before shutting down with unsaved changes
    pub confirm_on_shutdown: bool,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            policy: SavePolicy::default(),
            auto_save_delay_ms: 2000,
            confirm_on_shutdown: true,
        }
    }
}

impl SaveSettings {
    pub fn from_json_str(source: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load settings from a JSON file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_json_str(&source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_millis(self.auto_save_delay_ms)
    }
}
