//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_inverter_core::{MonitorConfig, ReplayConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// CSV file receiving one row per snapshot
    pub csv: Option<PathBuf>,
    /// Minimum spacing of status lines in the log (milliseconds)
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
}

fn default_status_interval() -> u64 {
    1000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv: None,
            status_interval_ms: default_status_interval(),
        }
    }
}

/// Settings given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub channel: Option<u8>,
    pub buffer_size: Option<usize>,
    pub csv: Option<PathBuf>,
    pub speed: Option<f64>,
    pub loop_playback: bool,
}

impl AppConfig {
    /// Apply command-line values on top of the file values
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(channel) = overrides.channel {
            self.monitor.channel = channel;
            self.replay.interface = self.monitor.interface_name();
        }
        if let Some(capacity) = overrides.buffer_size {
            self.monitor.buffer_capacity = capacity;
        }
        if let Some(csv) = &overrides.csv {
            self.output.csv = Some(csv.clone());
        }
        if let Some(speed) = overrides.speed {
            self.replay.speed_factor = speed;
        }
        if overrides.loop_playback {
            self.replay.loop_playback = true;
        }
    }

    /// Check every section before any transport or file is opened
    pub fn validate(&self) -> Result<()> {
        self.monitor
            .validate()
            .context("Invalid [monitor] configuration")?;
        self.replay
            .validate()
            .context("Invalid [replay] configuration")?;
        if self.output.status_interval_ms == 0 {
            anyhow::bail!("Invalid [output] configuration: status_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
