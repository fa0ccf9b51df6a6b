//! Configuration for the ECG workbench.

use crate::backend::BackendConfig;
use crate::core::peaks::DEFAULT_PEAK_THRESHOLD;
use crate::source::SyntheticSource;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the workbench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Parameters of the synthetic source
    pub synthetic: SyntheticSource,

    /// Resampling and peak detection parameters
    pub processing: ProcessingConfig,

    /// Where HRV metrics are computed
    pub metrics_mode: MetricsMode,

    /// Remote metrics service
    pub backend: BackendConfig,

    /// How long a health-store query may take
    #[serde(with = "duration_serde")]
    pub acquisition_timeout: Duration,

    /// Path for writing exports
    pub export_path: PathBuf,

    /// Path for storing groups and recordings
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ecg-workbench");

        Self {
            synthetic: SyntheticSource::default(),
            processing: ProcessingConfig::default(),
            metrics_mode: MetricsMode::Local,
            backend: BackendConfig::default(),
            acquisition_timeout: Duration::from_secs(30),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ecg-workbench")
            .join("config.json")
    }

    /// File holding the persisted group mapping.
    pub fn groups_path(&self) -> PathBuf {
        self.data_path.join("groups.json")
    }

    /// Directory backing the recording store.
    pub fn recordings_path(&self) -> PathBuf {
        self.data_path.join("recordings")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(self.recordings_path())?;
        Ok(())
    }
}

/// Parameters of the processing stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Keep every Nth sample before peak detection
    pub downsample_factor: NonZeroUsize,
    /// Minimum amplitude of a peak, in microvolts
    pub peak_threshold: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            downsample_factor: NonZeroUsize::MIN,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
        }
    }
}

/// Where HRV metrics come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMode {
    /// Derived in-process from detected peaks
    Local,
    /// Requested from the metrics service
    Remote,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// Serde support for Duration.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.synthetic.sampling_rate, 512.0);
        assert_eq!(config.synthetic.duration, 30.0);
        assert_eq!(config.processing.downsample_factor.get(), 1);
        assert_eq!(config.processing.peak_threshold, 80.0);
        assert_eq!(config.metrics_mode, MetricsMode::Local);
        assert_eq!(config.backend.start_index, 0);
        assert!(config.groups_path().ends_with("groups.json"));
    }

    #[test]
    fn test_config_json_round_trip() {
        let mut config = Config::default();
        config.metrics_mode = MetricsMode::Remote;
        config.backend.timeout = Duration::from_secs(12);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""metrics_mode":"remote""#));
        assert!(json.contains(r#""timeout":12"#));

        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metrics_mode, MetricsMode::Remote);
        assert_eq!(back.backend, config.backend);
        assert_eq!(back.processing, config.processing);
    }

    #[test]
    fn test_zero_downsample_factor_rejected() {
        let json = r#"{"downsample_factor": 0, "peak_threshold": 80.0}"#;
        assert!(serde_json::from_str::<ProcessingConfig>(json).is_err());
    }
}
