//! User preferences shared by every document.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::store::write_atomic;

pub const MIN_SCALE: f32 = 0.5;
pub const MAX_SCALE: f32 = 4.0;
pub const SCALE_STEP: f32 = 0.1;

pub const DEFAULT_INSTRUCTION: &str =
    "Explain the selected content below, listing the key points and any likely context.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Single,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Sepia,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    FitWidth,
    Manual,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Single => "single",
            ViewMode::Scroll => "scroll",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Single => ViewMode::Scroll,
            ViewMode::Scroll => ViewMode::Single,
        }
    }
}

impl std::fmt::Display for ViewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViewMode {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(ViewMode::Single),
            "scroll" | "continuous" => Ok(ViewMode::Scroll),
            _ => Err("unknown view mode"),
        }
    }
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Sepia => "sepia",
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Theme::Sepia => Theme::Light,
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Sepia,
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub mode: ViewMode,
    pub theme: Theme,
    pub scale_mode: ScaleMode,
    pub manual_scale: f32,
    pub ai_instruction: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ViewMode::Single,
            theme: Theme::Sepia,
            scale_mode: ScaleMode::FitWidth,
            manual_scale: 1.2,
            ai_instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        if !self.manual_scale.is_finite() {
            self.manual_scale = 1.2;
        }
        self.manual_scale = self.manual_scale.clamp(MIN_SCALE, MAX_SCALE);
        if self.ai_instruction.trim().is_empty() {
            self.ai_instruction = DEFAULT_INSTRUCTION.to_string();
        }
    }

    pub fn cycle_theme(&mut self) {
        self.theme = self.theme.next();
    }

    /// Switches to manual scaling and moves the stored manual scale one step,
    /// even when fit-width was active. Returns `false` when nothing changed.
    pub fn step_scale(&mut self, delta: f32) -> bool {
        let next = (self.manual_scale + delta).clamp(MIN_SCALE, MAX_SCALE);
        let changed =
            self.scale_mode != ScaleMode::Manual || (next - self.manual_scale).abs() > f32::EPSILON;
        self.scale_mode = ScaleMode::Manual;
        self.manual_scale = next;
        changed
    }

    /// Instruction sent with an annotation; falls back to the stored default.
    pub fn instruction_or_default<'a>(&'a self, edited: &'a str) -> &'a str {
        let trimmed = edited.trim();
        if trimmed.is_empty() {
            self.ai_instruction.as_str()
        } else {
            trimmed
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Option<Settings>>;
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// `settings.toml` inside the configuration directory.
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<Option<Settings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings {:?}", self.path))?;
        let mut settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("failed to decode settings {:?}", self.path))?;
        settings.normalize();
        Ok(Some(settings))
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let payload = toml::to_string_pretty(settings).context("failed to encode settings")?;
        write_atomic(&self.path, payload.as_bytes())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<Settings>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.inner.lock() = Some(settings.clone());
        Ok(())
    }
}
