//! Persisted user preferences.
//!
//! Settings live in a small JSON document. Loading merges whatever keys
//! are present over the defaults, and migrates the older single-`theme`
//! layout into the light/dark slots.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::directive::RenderMode;
use crate::theme::{self, Appearance};

const LEGACY_THEME_KEY: &str = "theme";
const THEME_LIGHT_KEY: &str = "themeLight";
const THEME_DARK_KEY: &str = "themeDark";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme_light: String,
    pub theme_dark: String,
    pub font: String,
    pub transparent: bool,
    pub default_mode: RenderMode,
    pub custom_bg: String,
    pub custom_fg: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme_light: "catppuccin-latte".to_string(),
            theme_dark: "catppuccin-mocha".to_string(),
            font: "Inter".to_string(),
            transparent: false,
            default_mode: RenderMode::Svg,
            custom_bg: "#ffffff".to_string(),
            custom_fg: "#27272a".to_string(),
        }
    }
}

/// Cache key summarising everything that changes a diagram's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderFingerprint(String);

impl RenderFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RenderFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Settings {
    /// Fingerprint of the settings as seen under `appearance`.
    ///
    /// Only the theme slot active for `appearance` takes part.
    pub fn fingerprint(&self, appearance: Appearance) -> RenderFingerprint {
        let key = (
            theme::active_theme_name(self, appearance),
            self.font.as_str(),
            self.transparent,
            self.default_mode.as_str(),
            self.custom_bg.as_str(),
            self.custom_fg.as_str(),
        );
        RenderFingerprint(format!("{key:?}"))
    }

    /// Build settings from a persisted JSON document.
    ///
    /// Unknown keys and values of the wrong type are dropped. A legacy
    /// `theme` value is moved into the dark or light slot when neither slot
    /// is present.
    pub fn from_persisted(data: &Value) -> Self {
        let Some(persisted) = data.as_object() else {
            if !data.is_null() {
                tracing::warn!("settings document is not an object, using defaults");
            }
            return Self::default();
        };

        let mut merged = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => return Self::default(),
        };

        for (key, value) in persisted {
            if !merged.contains_key(key) {
                continue;
            }
            let previous = merged.insert(key.clone(), value.clone());
            if serde_json::from_value::<Self>(Value::Object(merged.clone())).is_err() {
                tracing::warn!(key = %key, value = %value, "ignoring invalid setting");
                if let Some(previous) = previous {
                    merged.insert(key.clone(), previous);
                }
            }
        }

        migrate_legacy_theme(persisted, &mut merged);

        serde_json::from_value(Value::Object(merged)).unwrap_or_default()
    }

    /// Set one field from its persisted key name (or a kebab/snake variant).
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or values that don't parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let invalid = |reason: String| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        match normalized.as_str() {
            "themelight" => self.theme_light = value.to_string(),
            "themedark" => self.theme_dark = value.to_string(),
            "font" => self.font = value.to_string(),
            "transparent" => {
                self.transparent = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected true or false".to_string()))?;
            }
            "defaultmode" => self.default_mode = value.parse().map_err(invalid)?,
            "custombg" => self.custom_bg = value.to_string(),
            "customfg" => self.custom_fg = value.to_string(),
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn migrate_legacy_theme(persisted: &Map<String, Value>, merged: &mut Map<String, Value>) {
    if persisted.contains_key(THEME_LIGHT_KEY) || persisted.contains_key(THEME_DARK_KEY) {
        return;
    }
    let Some(legacy) = persisted.get(LEGACY_THEME_KEY).and_then(Value::as_str) else {
        return;
    };

    let slot = if theme::is_dark_theme(legacy) {
        THEME_DARK_KEY
    } else {
        THEME_LIGHT_KEY
    };
    tracing::info!(theme = legacy, slot, "migrating legacy theme setting");
    merged.insert(slot.to_string(), Value::String(legacy.to_string()));
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write settings {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Owns the settings document on disk and tells subscribers when it changes.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    subscribers: Vec<Sender<Settings>>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing or malformed file gives defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = read_settings(&path)?;
        Ok(Self {
            path,
            settings,
            subscribers: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Receive a copy of the settings after every successful save.
    pub fn subscribe(&mut self) -> Receiver<Settings> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Persist the current settings and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    pub fn save(&mut self) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, format!("{json}\n")).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "settings saved");

        self.notify();
        Ok(())
    }

    fn notify(&mut self) {
        let settings = self.settings.clone();
        self.subscribers
            .retain(|tx| tx.send(settings.clone()).is_ok());
    }

    /// Apply `f` to the settings, then save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn update(&mut self, f: impl FnOnce(&mut Settings)) -> Result<(), SettingsError> {
        f(&mut self.settings);
        self.save()
    }

    /// Set one field by key, then save.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown key, an unparsable value, or a failed save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.settings.set(key, value)?;
        self.save()
    }

    /// Restore defaults and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn reset(&mut self) -> Result<(), SettingsError> {
        self.update(|s| *s = Settings::default())
    }

    /// Re-read the document after an outside change.
    ///
    /// Returns `true` and notifies subscribers if the settings differ from
    /// the previous ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn reload(&mut self) -> Result<bool, SettingsError> {
        let fresh = read_settings(&self.path)?;
        if fresh == self.settings {
            return Ok(false);
        }
        self.settings = fresh;
        self.notify();
        Ok(true)
    }
}

fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => Ok(Settings::from_persisted(&value)),
        Err(err) => {
            tracing::warn!(path = %path.display(), "malformed settings, using defaults: {err}");
            Ok(Settings::default())
        }
    }
}

/// Default location of the settings document.
pub fn global_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata)
                .join("mermaid-lens")
                .join("settings.json");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("mermaid-lens")
                .join("settings.json");
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("mermaid-lens").join("settings.json");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("mermaid-lens")
                .join("settings.json");
        }
    }

    PathBuf::from(".mermaid-lens.json")
}
