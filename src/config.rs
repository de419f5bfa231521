//! Tracker configuration
//!
//! Runtime knobs for the tracker. Cadence thresholds and MET coefficients are
//! fixed constants in [`crate::gait`], not configuration.

use crate::error::TrackerError;
use crate::gait::{DEFAULT_COOLDOWN_MS, DEFAULT_STRIDE_COEFFICIENT, DEFAULT_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up inside the data directory
pub const CONFIG_FILE: &str = "strider.json";

/// Default delay before the service stops when no step detector exists
pub const DEFAULT_SENSOR_GRACE_MS: u64 = 1_000;

/// Longest accepted cadence window (seconds)
pub const MAX_WINDOW_SECS: u64 = 3_600;

/// Default capacity of the pulse queue between detector and classifier
pub const DEFAULT_PULSE_BUFFER: usize = 256;

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory holding the step log and settings documents
    pub data_dir: PathBuf,
    /// Trailing window used for cadence (seconds)
    pub window_secs: u64,
    /// Silence before the user is reported still (milliseconds)
    pub cooldown_ms: u64,
    /// Step length as a fraction of height
    pub stride_coefficient: f64,
    /// Delay before shutting down when the sensor is missing (milliseconds)
    pub sensor_grace_ms: u64,
    /// Pulses buffered between detector and classifier
    pub pulse_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("strider-data"),
            window_secs: DEFAULT_WINDOW_SECS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            stride_coefficient: DEFAULT_STRIDE_COEFFICIENT,
            sensor_grace_ms: DEFAULT_SENSOR_GRACE_MS,
            pulse_buffer: DEFAULT_PULSE_BUFFER,
        }
    }
}

impl TrackerConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load `strider.json` from `data_dir` if present, otherwise defaults.
    /// The directory passed in always wins over one named in the file.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.data_dir = data_dir;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self, TrackerError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values that would make the classifier meaningless
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.window_secs == 0 {
            return Err(TrackerError::Config("window_secs must be positive".to_string()));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(TrackerError::Config(format!(
                "window_secs must be at most {}",
                MAX_WINDOW_SECS
            )));
        }
        if self.cooldown_ms == 0 {
            return Err(TrackerError::Config("cooldown_ms must be positive".to_string()));
        }
        if !(self.stride_coefficient > 0.0 && self.stride_coefficient.is_finite()) {
            return Err(TrackerError::Config(
                "stride_coefficient must be a positive finite number".to_string(),
            ));
        }
        if self.pulse_buffer == 0 {
            return Err(TrackerError::Config("pulse_buffer must be positive".to_string()));
        }
        Ok(())
    }

    /// Cadence window, capped at [`MAX_WINDOW_SECS`] for unvalidated configs
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn sensor_grace(&self) -> Duration {
        Duration::from_millis(self.sensor_grace_ms)
    }
}
