//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::AppConfig;
use crate::models::{JobKind, TestConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./autotester.yaml",
    "./autotester.yml",
    "./.autotester.yaml",
    "~/.config/autotester/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Default probe toggles for submissions
    #[serde(default)]
    pub probes: TestConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            probes: TestConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load an explicit file, else the first standard location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        let app = &self.app;
        if app.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        if app.probe_timeout_secs == 0 {
            anyhow::bail!("probe_timeout_secs must be at least 1");
        }
        if app.poll.interval_ms == 0 {
            anyhow::bail!("poll.interval_ms must be at least 1");
        }
        if app.retention_hours == Some(0) {
            anyhow::bail!("retention_hours must be at least 1; omit it to keep jobs forever");
        }
        if let Some(limit) = app.max_response_time_ms {
            if limit.is_nan() || limit <= 0.0 {
                anyhow::bail!("max_response_time_ms must be positive, got {}", limit);
            }
        }
        if self.probes.max_requests == 0 {
            anyhow::bail!("probes.maxRequests must be at least 1");
        }
        if self.probes.enabled_probes(JobKind::Api).is_empty()
            && self.probes.enabled_probes(JobKind::Ui).is_empty()
        {
            anyhow::bail!("At least one probe type must be enabled");
        }

        Ok(())
    }

    /// Example configuration written by `config init`
    pub fn example() -> Self {
        let mut config = Self::default();
        config.app.max_response_time_ms = Some(2000.0);
        config.app.retention_hours = Some(24 * 7);
        config
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// Where `config init` writes by default
pub fn default_config_path() -> PathBuf {
    expand_path("~/.config/autotester/config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        for name in ["config.yaml", "config.json"] {
            let path = dir.path().join(name);
            let config = ConfigFile::example();
            config.save(&path).unwrap();

            let loaded = ConfigFile::load(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_probe_toggles_use_wire_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autotester.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\nprobes:\n  testHeaders: false\n  maxRequests: 10\n",
        )
        .unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert!(!loaded.probes.test_headers);
        assert!(loaded.probes.test_params);
        assert_eq!(loaded.probes.max_requests, 10);
    }

    #[test]
    fn test_validate_config() {
        let mut config = ConfigFile::default();
        config.app.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.version = "9.9".to_string();
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.app.retention_hours = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(ConfigFile::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
