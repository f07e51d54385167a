//! Configuration for the zoned cache.
//!
//! Supports TOML configuration files with sensible defaults. Configuration is
//! loaded from:
//! - macOS: ~/Library/Application Support/zcache/config.toml
//! - Linux: ~/.config/zcache/config.toml
//! - Windows: %APPDATA%/zcache/config.toml

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Geometry;

/// Eviction policy selector (spec §6 tunable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Plain zone-granularity eviction, FIFO, no promotion on read.
    Zone,
    /// LRU over zones, promoted on read.
    PromoteZone,
    /// LRU over individual chunks, plus GC with in-place compaction.
    Chunk,
}

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub tunables: Tunables,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            tunables: Tunables::default(),
        }
    }
}

/// Device/cache geometry plus the backing file/device path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub path: Option<PathBuf>,
    pub num_zones: u32,
    pub zone_size_bytes: u64,
    pub zone_capacity_bytes: u64,
    pub chunk_size_bytes: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: None,
            num_zones: 64,
            zone_size_bytes: 256 * 1024 * 1024,
            zone_capacity_bytes: 256 * 1024 * 1024,
            chunk_size_bytes: 4096,
        }
    }
}

impl DeviceConfig {
    pub fn geometry(&self) -> Geometry {
        Geometry {
            num_zones: self.num_zones,
            zone_size_bytes: self.zone_size_bytes,
            zone_capacity_bytes: self.zone_capacity_bytes,
            chunk_size_bytes: self.chunk_size_bytes,
        }
    }
}

/// The tunables enumerated in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub evict_low_thresh_zones: u32,
    pub evict_high_thresh_zones: u32,
    pub evict_low_thresh_chunks: u32,
    pub evict_high_thresh_chunks: u32,
    pub max_open_zones: u32,
    pub backoff_us_start: u64,
    pub backoff_retries: u32,
    pub write_granularity: u64,
    pub policy: PolicyKind,
    /// Optional path for the metrics sink; `None` disables file metrics.
    pub metrics_path: Option<PathBuf>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            evict_low_thresh_zones: 4,
            evict_high_thresh_zones: 8,
            evict_low_thresh_chunks: 256,
            evict_high_thresh_chunks: 512,
            max_open_zones: 4,
            backoff_us_start: 100_000,
            backoff_retries: 5,
            write_granularity: 4096,
            policy: PolicyKind::Chunk,
            metrics_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("no config directory found, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("saved config to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "zcache", "zcache").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.num_zones, 64);
        assert_eq!(config.tunables.backoff_retries, 5);
        assert_eq!(config.tunables.policy, PolicyKind::Chunk);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.device.chunk_size_bytes, config.device.chunk_size_bytes);
        assert_eq!(parsed.tunables.max_open_zones, config.tunables.max_open_zones);
    }

    #[test]
    fn test_partial_config_uses_defaults_elsewhere() {
        let toml_str = r#"
            [tunables]
            max_open_zones = 1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tunables.max_open_zones, 1);
        assert_eq!(config.tunables.backoff_retries, 5);
    }

    #[test]
    fn test_load_missing_uses_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/zcache-config.toml")).unwrap();
        assert_eq!(config.device.num_zones, 64);
    }

    #[test]
    fn test_geometry_from_device_config() {
        let dc = DeviceConfig::default();
        let g = dc.geometry();
        assert_eq!(g.chunks_per_zone(), (dc.zone_capacity_bytes / dc.chunk_size_bytes) as u32);
    }
}
