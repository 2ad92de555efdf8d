// src/config.rs

//! Defines the configuration structures for `camtex`.
//!
//! The structs deserialize from a JSON file named by the `CAMTEX_CONFIG`
//! environment variable. Every section carries `#[serde(default)]`, so a
//! config file only needs the keys it wants to change.

use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV_VAR: &str = "CAMTEX_CONFIG";

/// Process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

/// Represents the complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Native window geometry and title.
    pub window: WindowConfig,
    /// Capture device selection.
    pub capture: CaptureConfig,
    /// Shader file locations used by the demo renderer.
    pub shaders: ShaderConfig,
    /// Per-frame drawing settings.
    pub render: RenderConfig,
}

impl Config {
    /// Loads the config named by `CAMTEX_CONFIG`, falling back to defaults.
    ///
    /// A missing variable is normal and silent. An unreadable or malformed
    /// file is logged and ignored; configuration problems never abort startup.
    pub fn load_or_default() -> Self {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => match Self::load_from_path(Path::new(&path)) {
                Ok(config) => {
                    info!("Configuration loaded from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {:?}: {:#}. Using defaults.", path, e);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).map_err(|e| anyhow::anyhow!("Invalid config JSON: {}", e))
    }
}

// --- Window Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    /// Initial position of the top-left corner, in root window coordinates.
    pub x: i32,
    pub y: i32,
    /// Initial size in pixels. The headless driver uses it as the pbuffer size.
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            title: "camtex".to_string(),
            x: 50,
            y: 50,
            width: 800,
            height: 600,
        }
    }
}

// --- Capture Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// A device path (e.g. "/dev/video0") or an inherited descriptor ("fd:3").
    pub device: String,
    /// Whether the capture texture refreshes itself every frame from the start.
    pub autoplay: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device: "/dev/video0".to_string(),
            autoplay: true,
        }
    }
}

// --- Shader Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        ShaderConfig {
            vertex: PathBuf::from("shader/test.vs"),
            fragment: PathBuf::from("shader/test.fs"),
        }
    }
}

// --- Render Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// RGBA clear colour, each component in 0.0..=1.0.
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            clear_color: [0.1, 0.2, 0.3, 1.0],
        }
    }
}
