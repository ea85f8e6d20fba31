// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::{CopyThresholds, LadderConfig, default_log_path};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub copy: CopyThresholds,

    #[serde(default)]
    pub ladder: LadderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file; defaults to ffseg.log in the working directory
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Log to stderr instead of any file
    #[serde(default)]
    pub stderr: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Presentation time covered by each output file
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: f64,

    #[serde(default = "default_extension")]
    pub extension: String,

    /// Segments the producer may run ahead of the last acknowledgment
    #[serde(default = "default_lead_window")]
    pub lead_window: u32,

    /// Consecutive ack channel failures before the gate stops blocking
    #[serde(default = "default_ack_failure_limit")]
    pub ack_failure_limit: u32,

    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Per-stream demux queue depth
    #[serde(default = "default_max_queued_packets")]
    pub max_queued_packets: usize,

    /// Tail padding cadence as a fraction of a segment
    #[serde(default = "default_tail_fill_divisions")]
    pub tail_fill_divisions: u32,

    /// Fixed per-iteration delay before any consumer throttle directive
    #[serde(default)]
    pub throttle_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_segment_seconds() -> f64 {
    10.0
}

fn default_extension() -> String {
    "ts".to_string()
}

fn default_lead_window() -> u32 {
    5
}

fn default_ack_failure_limit() -> u32 {
    100
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_max_queued_packets() -> usize {
    256
}

fn default_tail_fill_divisions() -> u32 {
    4
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            stderr: false,
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            segment_seconds: default_segment_seconds(),
            extension: default_extension(),
            lead_window: default_lead_window(),
            ack_failure_limit: default_ack_failure_limit(),
            progress_interval_ms: default_progress_interval_ms(),
            max_queued_packets: default_max_queued_packets(),
            tail_fill_divisions: default_tail_fill_divisions(),
            throttle_ms: 0,
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_ascii_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" | "warning" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    /// Where diagnostics go: `None` means stderr
    pub fn destination(&self) -> Result<Option<PathBuf>> {
        if self.stderr {
            return Ok(None);
        }
        match &self.file {
            Some(file) => Ok(Some(file.clone())),
            None => default_log_path().map(Some),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("ffseg")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("ffseg")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // The directory may not be writable; built-in defaults still apply
            if let Err(e) = config.save() {
                tracing::warn!("Could not create default config file: {:#}", e);
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if !path.exists() {
            Config::default().save_to(&path)?;
        }
        Ok(path)
    }
}
