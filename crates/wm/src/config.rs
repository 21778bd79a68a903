//! Runtime configuration

use std::path::{Path, PathBuf};

use fusion::{TransportKind, WorldConfig};
use serde::{Deserialize, Serialize};
use surface::PixelFormat;

use crate::error::ConfigError;
use crate::types::Insets;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "STACKFB_CONFIG";

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Window manager module to load; the first registered one when unset
    pub wm: Option<String>,

    /// Skip backend cursor updates entirely
    pub no_cursor_updates: bool,

    /// Size of the session's shared memory pool in bytes
    pub shm_pool_size: usize,

    /// Call channel transport
    pub transport: TransportKind,

    /// Directory for call channel sockets (default: the user's runtime dir)
    pub socket_dir: Option<PathBuf>,

    /// Default pixel format of window surfaces
    pub pixel_format: PixelFormat,

    /// Size of the system memory surface pool in bytes
    pub system_pool_size: usize,

    /// Built-in "stacking" window manager
    pub stacking: StackingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wm: None,
            no_cursor_updates: false,
            shm_pool_size: 1 << 20,
            transport: TransportKind::Single,
            socket_dir: None,
            pixel_format: PixelFormat::Argb,
            system_pool_size: 8 << 20,
            stacking: StackingConfig::default(),
        }
    }
}

/// Settings of the built-in stacking window manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    /// Decoration thickness around decorated windows
    pub insets: Insets,

    /// Focus a window when a button is pressed over it
    pub focus_on_click: bool,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            insets: Insets::default(),
            focus_on_click: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        let config_paths = [
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            dirs::config_dir().map(|p| p.join("stackfb/config.toml")),
            Some(PathBuf::from("/etc/stackfb/config.toml")),
        ];

        for path in config_paths.into_iter().flatten() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => {
                        tracing::info!(?path, wm = ?config.wm, transport = ?config.transport, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "failed to load config");
                    }
                }
            }
        }

        tracing::info!("using default configuration");
        Self::default()
    }

    /// Read, parse and validate one file
    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shm_pool_size == 0 {
            return Err(ConfigError::ZeroSize { field: "shm_pool_size" });
        }
        if self.system_pool_size == 0 {
            return Err(ConfigError::ZeroSize {
                field: "system_pool_size",
            });
        }
        let insets = self.stacking.insets;
        for (side, value) in [("l", insets.l), ("t", insets.t), ("r", insets.r), ("b", insets.b)] {
            if value < 0 {
                return Err(ConfigError::NegativeInset { side, value });
            }
        }
        Ok(())
    }

    /// Call channel parameters for a session with the given index
    pub fn world_config(&self, index: u32) -> WorldConfig {
        WorldConfig {
            index,
            transport: self.transport,
            socket_dir: self.socket_dir.clone(),
        }
    }
}

/// Why a config file could not be used
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid: {0}")]
    Invalid(#[from] ConfigError),
}

/// Helper for getting XDG directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}
