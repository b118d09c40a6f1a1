//! Runtime configuration: where the data tree lives and what a fresh state
//! document starts with. Persisted user settings live in the state document
//! itself, not here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::store::{
    DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH, DEFAULT_ROTATION_SECONDS,
    MIN_DISPLAY_DIMENSION, MIN_ROTATION_SECONDS, Settings,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Root of the data tree; `data/` with the state file and image assets
    /// is created beneath it.
    pub base_dir: PathBuf,
    /// Rotation interval seeded into a fresh state document.
    pub default_rotation_seconds: u64,
    /// Panel size seeded into a fresh state document.
    pub default_display_width: u32,
    pub default_display_height: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            default_rotation_seconds: DEFAULT_ROTATION_SECONDS,
            default_display_width: DEFAULT_DISPLAY_WIDTH,
            default_display_height: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

impl Configuration {
    /// Load from a YAML file; a missing file just means defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.default_rotation_seconds >= MIN_ROTATION_SECONDS,
            "default-rotation-seconds must be at least {MIN_ROTATION_SECONDS}"
        );
        ensure!(
            self.default_display_width >= MIN_DISPLAY_DIMENSION
                && self.default_display_height >= MIN_DISPLAY_DIMENSION,
            "display dimensions must be at least {MIN_DISPLAY_DIMENSION}"
        );
        Ok(self)
    }

    pub fn state_file(&self) -> PathBuf {
        self.base_dir.join("data").join("state.json")
    }

    /// Settings block for a state document created from scratch.
    pub fn default_settings(&self) -> Settings {
        Settings {
            rotation_seconds: self.default_rotation_seconds,
            display_width: self.default_display_width,
            display_height: self.default_display_height,
        }
    }
}
