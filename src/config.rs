//! # Configuration Management Module
//!
//! Persistent session settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `device_id`: radio device to connect to (MAC address or scanner id)
//! - `protocol`: wire framing variant, fixed for the session
//! - `encodings`: ordered text-decoding fallback list for incoming chunks
//! - `retry_delay_ms`: pause between reconnect attempts (0 = immediate)
//! - `chart_capacity`: ring buffer depth per measurement channel
//! - `upload`: persistent-store flush cadence and output path
//! - `features`: sliding-window size and classification cadence
//! - `subject` / `activity`: session metadata attached to uploaded records
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/vitalstream/config.toml
//! - Linux: ~/.config/vitalstream/config.toml
//! - Windows: %APPDATA%\vitalstream\config.toml
//!
//! ## Why TOML
//! Human-readable format allows manual editing if needed. Serde provides
//! automatic serialization/deserialization.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Wire framing variant, selected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolVariant {
    /// One or more JSON-like objects per `[ ... ]` span
    BracketJson,
    /// Comma-separated lines mapped positionally onto `csv_columns`
    CsvLines,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub enabled: bool,
    pub flush_secs: u64,
    /// Output path for the line-delimited JSON store backend
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Samples kept per sliding window
    pub window: usize,
    /// Seconds between classification ticks
    pub cadence_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device_id: String,
    pub protocol: ProtocolVariant,
    /// Ordered decoding fallback list; unknown names are skipped with a warning
    pub encodings: Vec<String>,
    /// Columns for the CSV variant, as dotted `Channel.field` keys
    pub csv_columns: Vec<String>,
    pub retry_delay_ms: u64,
    pub chart_capacity: usize,
    pub subject: String,
    pub activity: String,
    // Tables last so TOML serialization stays valid
    pub upload: UploadConfig,
    pub features: FeatureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            protocol: ProtocolVariant::BracketJson,
            encodings: vec!["utf-8".to_string(), "latin-1".to_string(), "ascii".to_string()],
            csv_columns: vec![
                "PulseSensor.pulse_BPM".to_string(),
                "RespiratoryRate.BRPM".to_string(),
                "ObjectTemp.Celsius".to_string(),
                "Accelerometer.s_rate".to_string(),
                "Gyroscope.r_rate".to_string(),
            ],
            retry_delay_ms: 0,
            chart_capacity: 200,
            subject: "unspecified".to_string(),
            activity: "Idle".to_string(),
            upload: UploadConfig {
                enabled: false,
                flush_secs: 1,
                store_path: PathBuf::from("vitalstream_records.jsonl"),
            },
            features: FeatureConfig {
                window: 8,
                cadence_secs: 5,
            },
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("vitalstream").join("config.toml")
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, create default
                let config = Self::default();
                config.save()?; // Save default config
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(&path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
