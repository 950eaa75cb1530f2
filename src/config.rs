//! Configuration management for gpu-telemetry
//!
//! Config file location:
//! - Linux: ~/.config/gpu-telemetry/config.toml
//! - macOS: ~/Library/Application Support/gpu-telemetry/config.toml
//! - Windows: %APPDATA%/gpu-telemetry/config.toml
//!
//! You can override the config location by setting `GPU_TELEMETRY_CONFIG_PATH`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::GpuVendor;
use crate::error::TelemetryError;

/// Longest settle time accepted after the counter warm-up sample
pub const MAX_WARMUP_MS: u64 = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Vendor SDK probing
    #[serde(default)]
    pub backends: BackendConfig,

    /// OS performance counter fallback
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    /// Load configuration from file or use defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that would leave the session with nothing to try
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.backends.order.is_empty() && !self.fallback.enabled {
            return Err(TelemetryError::Config(
                "backends.order is empty and the fallback is disabled".to_string(),
            ));
        }
        if self.fallback.warmup_ms > MAX_WARMUP_MS {
            return Err(TelemetryError::Config(format!(
                "fallback.warmup_ms must be at most {} (got {})",
                MAX_WARMUP_MS, self.fallback.warmup_ms
            )));
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("GPU_TELEMETRY_CONFIG_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        let proj_dirs = ProjectDirs::from("com", "gpu-telemetry", "gpu-telemetry")
            .context("Could not determine project directories")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Vendor SDK probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Vendor tiers to try, in order
    #[serde(default = "default_order")]
    pub order: Vec<GpuVendor>,

    /// Extra NVML locations, tried before the built-in ones
    #[serde(default)]
    pub nvidia_paths: Vec<PathBuf>,

    /// Extra AGS locations
    #[serde(default)]
    pub amd_paths: Vec<PathBuf>,

    /// Extra IGCL locations
    #[serde(default)]
    pub intel_paths: Vec<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            nvidia_paths: Vec::new(),
            amd_paths: Vec::new(),
            intel_paths: Vec::new(),
        }
    }
}

impl BackendConfig {
    pub fn extra_paths(&self, vendor: GpuVendor) -> &[PathBuf] {
        match vendor {
            GpuVendor::Nvidia => &self.nvidia_paths,
            GpuVendor::Amd => &self.amd_paths,
            GpuVendor::Intel => &self.intel_paths,
        }
    }
}

fn default_order() -> Vec<GpuVendor> {
    GpuVendor::ALL.to_vec()
}

/// Performance counter fallback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Use OS counters when no vendor SDK initializes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Settle time after the warm-up sample, in milliseconds
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    /// Vendor to attribute counter readings to when the OS registry cannot tell
    #[serde(default)]
    pub vendor_hint: Option<GpuVendor>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            warmup_ms: default_warmup_ms(),
            vendor_hint: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_warmup_ms() -> u64 {
    100
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(
            config.backends.order,
            vec![GpuVendor::Nvidia, GpuVendor::Amd, GpuVendor::Intel]
        );
        assert!(config.backends.nvidia_paths.is_empty());
        assert!(config.fallback.enabled);
        assert_eq!(config.fallback.warmup_ms, 100);
        assert_eq!(config.fallback.vendor_hint, None);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_serialization() {
        let config = TelemetryConfig::default();
        let toml = toml::to_string(&config).unwrap();

        assert!(toml.contains("[backends]"));
        assert!(toml.contains("order"));
        assert!(toml.contains("warmup_ms"));
        assert!(toml.contains("level"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [backends]
            order = ["intel", "nvidia"]
            intel_paths = ["C:\\Drivers\\igcl64.dll"]

            [fallback]
            vendor_hint = "amd"
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.order, vec![GpuVendor::Intel, GpuVendor::Nvidia]);
        assert_eq!(
            config.backends.extra_paths(GpuVendor::Intel),
            &[PathBuf::from("C:\\Drivers\\igcl64.dll")]
        );
        assert!(config.fallback.enabled);
        assert_eq!(config.fallback.warmup_ms, 100);
        assert_eq!(config.fallback.vendor_hint, Some(GpuVendor::Amd));
    }

    #[test]
    fn unusable_settings_are_rejected() {
        let mut config = TelemetryConfig::default();
        config.backends.order.clear();
        assert!(config.validate().is_ok());

        config.fallback.enabled = false;
        assert!(matches!(config.validate(), Err(TelemetryError::Config(_))));

        let mut config = TelemetryConfig::default();
        config.fallback.warmup_ms = MAX_WARMUP_MS + 1;
        assert!(config.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fallback]\nwarmup_ms = 60000\n").unwrap();
        assert!(TelemetryConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert_eq!(
            TelemetryConfig::load_from(&path).unwrap(),
            TelemetryConfig::default()
        );

        let mut config = TelemetryConfig::default();
        config.fallback.warmup_ms = 250;
        config.backends.nvidia_paths.push(PathBuf::from("/opt/nvidia/libnvidia-ml.so.1"));
        config.save_to(&path).unwrap();

        assert_eq!(TelemetryConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backends = 3").unwrap();

        let err = TelemetryConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
