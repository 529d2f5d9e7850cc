//! CLI configuration

use seethrough_detector::{DetectorConfig, DevicePreference, ModelLocation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum number of history entries kept
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Detector settings
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Scan history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Page-scan candidate filtering
    #[serde(default)]
    pub scan: ScanConfig,
}

impl CliConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        // Try to load from file, or use defaults
        let mut config: Self = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        // Apply CLI overrides
        if let Some(url) = &cli.model_url {
            config.detector.model.location = ModelLocation::Url { url: url.clone() };
        }

        if let Some(path) = &cli.model_path {
            config.detector.model.location = ModelLocation::Local { path: path.clone() };
        }

        if let Some(device) = cli.device {
            config.detector.runtime.device = device;
        }

        if let Some(dir) = &cli.cache_dir {
            config.detector.cache.dir = dir.clone();
        }

        if cli.no_cache {
            config.detector.cache.enabled = false;
        }

        if let Some(path) = &cli.history_file {
            config.history.path = path.clone();
        }

        config.detector.validate()?;
        Ok(config)
    }
}

/// Scan history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Record results
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// History file
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    /// Maximum number of entries kept, newest first
    #[serde(default = "default_history_limit")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_history_path(),
            max_entries: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Page-scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Images must be larger than this many pixels in both dimensions
    #[serde(default = "default_min_size")]
    pub min_size: u32,

    /// Maximum number of images analyzed per scan
    #[serde(default = "default_scan_limit")]
    pub limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            limit: default_scan_limit(),
        }
    }
}

/// Parse a device name for `--device`
pub fn parse_device(s: &str) -> Result<DevicePreference, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(DevicePreference::Auto),
        "cpu" => Ok(DevicePreference::Cpu),
        "cuda" => Ok(DevicePreference::Cuda),
        "coreml" => Ok(DevicePreference::CoreMl),
        "directml" => Ok(DevicePreference::DirectMl),
        other => Err(format!(
            "unknown device '{}' (expected auto, cpu, cuda, coreml or directml)",
            other
        )),
    }
}

fn default_history_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seethrough/history.json")
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_min_size() -> u32 {
    100
}

fn default_scan_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}
