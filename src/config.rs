// src/config.rs
//! Configuration management

use crate::error::{Result, TrackerError};
use crate::tracker::{
    TrackerSettings, TrackingMode, DEFAULT_FALLBACK_THRESHOLD_MS, DEFAULT_MIN_UPDATE_DISTANCE_M,
    DEFAULT_MIN_UPDATE_INTERVAL_MS, DEFAULT_STALENESS_THRESHOLD_MS,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub mode: TrackingMode,
    pub min_update_interval_ms: u64,
    pub min_update_distance_m: f64,
    pub staleness_threshold_ms: u64,
    pub fallback_threshold_ms: u64,
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Fused,
            min_update_interval_ms: DEFAULT_MIN_UPDATE_INTERVAL_MS,
            min_update_distance_m: DEFAULT_MIN_UPDATE_DISTANCE_M,
            staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
            fallback_threshold_ms: DEFAULT_FALLBACK_THRESHOLD_MS,
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Load configuration from a file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TrackerError::Parse(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrackerError::Other(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| TrackerError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| TrackerError::Other("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("location-tracker")
            .join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_update_distance_m.is_finite() || self.min_update_distance_m < 0.0 {
            return Err(TrackerError::Config(format!(
                "min_update_distance_m must be a non-negative number, got {}",
                self.min_update_distance_m
            )));
        }
        if self.staleness_threshold_ms == 0 {
            return Err(TrackerError::Config(
                "staleness_threshold_ms must be positive".to_string(),
            ));
        }
        if self.fallback_threshold_ms == 0 {
            return Err(TrackerError::Config(
                "fallback_threshold_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            min_update_interval: millis(self.min_update_interval_ms),
            min_update_distance_m: self.min_update_distance_m,
            staleness_threshold: millis(self.staleness_threshold_ms),
            fallback_threshold: millis(self.fallback_threshold_ms),
        }
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
