// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `<config dir>/vcamera/config.json`. Missing or unreadable
//! files fall back to [`Config::default`] so a broken config never blocks
//! startup.

use crate::constants::{app_info, capture, launch};
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the sandbox (catalogue, app data, settings, logs)
    pub data_root: PathBuf,
    /// Hand synthetic capture handles to camera-capable packages
    pub virtualization_enabled: bool,
    /// Wait before the first liveness check after starting a package
    pub settle_delay_ms: u64,
    /// Upper bound of the liveness wait
    pub verification_timeout_ms: u64,
    /// Preview delivery rate of synthetic capture handles
    pub frame_rate: u32,
    /// Capability reported by synthetic capture handles
    pub nominal_width: u32,
    pub nominal_height: u32,
    /// Host platform level used to gate version-specific launch fixes
    pub host_platform_level: u32,
    /// Packages treated as camera capable regardless of declared permissions
    pub camera_allow_list: Vec<String>,
    /// Log every launch fix at info level
    pub verbose_launch_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            virtualization_enabled: true,
            settle_delay_ms: launch::SETTLE_DELAY.as_millis() as u64,
            verification_timeout_ms: launch::VERIFICATION_TIMEOUT.as_millis() as u64,
            frame_rate: capture::DEFAULT_FRAME_RATE,
            nominal_width: capture::NOMINAL_WIDTH,
            nominal_height: capture::NOMINAL_HEIGHT,
            host_platform_level: launch::DEFAULT_PLATFORM_LEVEL,
            camera_allow_list: capture::DEFAULT_ALLOW_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            verbose_launch_logging: false,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(app_info::APP_DIR_NAME).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Config not readable, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config is malformed, using defaults");
                Self::default()
            }
        }
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    /// Config rooted at `root`, used by tests and `--root` overrides
    pub fn with_data_root(root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: root.into(),
            ..Self::default()
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(app_info::APP_DIR_NAME)
}
