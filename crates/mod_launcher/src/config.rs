//! Configuration management for the mod launcher.
//!
//! This module handles loading, validation, and conversion of launcher
//! configuration from TOML files and command-line arguments.

use crate::cli::Args;
use mod_loader::config::{parse_mod_list, parse_version_replacements};
use mod_loader::{Environment, LoadOrder, LoaderConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub loader: LoaderSettings,
    #[serde(default)]
    pub debug: DebugSettings,
    pub logging: LoggingSettings,
}

/// Where mods come from and how the load set is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Directory scanned for `*.json` and `<dir>/mod.json` descriptors
    pub mods_directory: String,
    /// `client` or `server`
    pub environment: String,
    /// Optional dependency override file
    #[serde(default)]
    pub overrides_file: Option<String>,
    #[serde(default)]
    pub load_order: LoadOrder,
}

/// Debug switches. All off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Log every per-candidate decision
    pub development: bool,
    /// Let the first entrypoint failure escape instead of aggregating
    pub throw_directly: bool,
    /// `modA:1.0.0,modB:2.0.0`
    pub replace_versions: String,
    /// `modA,modB`
    pub disabled_mods: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            loader: LoaderSettings {
                mods_directory: "mods".to_string(),
                environment: "client".to_string(),
                overrides_file: None,
                load_order: LoadOrder::Resolution,
            },
            debug: DebugSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(mods) = &args.mods {
            self.loader.mods_directory = mods.to_string_lossy().to_string();
        }
        if let Some(environment) = args.environment {
            self.loader.environment = environment.to_string();
        }
        if let Some(overrides) = &args.overrides {
            self.loader.overrides_file = Some(overrides.to_string_lossy().to_string());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    pub fn mods_directory(&self) -> PathBuf {
        PathBuf::from(&self.loader.mods_directory)
    }

    pub fn overrides_file(&self) -> Option<PathBuf> {
        self.loader.overrides_file.as_ref().map(PathBuf::from)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.loader.mods_directory.is_empty() {
            return Err("Mods directory cannot be empty".to_string());
        }

        self.loader.environment.parse::<Environment>()?;

        if self
            .loader
            .overrides_file
            .as_ref()
            .is_some_and(|file| file.is_empty())
        {
            return Err("Overrides file cannot be empty when set".to_string());
        }

        parse_version_replacements(&self.debug.replace_versions)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the settings into the loader's own configuration.
    pub fn to_loader_config(&self) -> Result<LoaderConfig, String> {
        Ok(LoaderConfig {
            environment: self.loader.environment.parse()?,
            development: self.debug.development,
            throw_directly: self.debug.throw_directly,
            load_order: self.loader.load_order,
            replace_versions: parse_version_replacements(&self.debug.replace_versions)?,
            disabled_mods: parse_mod_list(&self.debug.disabled_mods),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.loader.mods_directory, "mods");
        assert_eq!(config.loader.environment, "client");
        assert!(config.loader.overrides_file.is_none());
        assert_eq!(config.loader.load_order, LoadOrder::Resolution);
        assert!(!config.debug.development);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file loads back to the same settings.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[loader]
mods_directory = "custom_mods"
environment = "server"
overrides_file = "overrides.json"
load_order = "alphabetical"

[debug]
development = true
replace_versions = "lib:2.0.0"
disabled_mods = "broken,older"

[logging]
level = "debug"
json_format = true
"#;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.loader.mods_directory, "custom_mods");
        assert_eq!(config.overrides_file(), Some(PathBuf::from("overrides.json")));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        let loader = config.to_loader_config().unwrap();
        assert_eq!(loader.environment, Environment::Server);
        assert_eq!(loader.load_order, LoadOrder::Alphabetical);
        assert!(loader.development);
        assert_eq!(loader.replace_versions["lib"], "2.0.0");
        assert!(loader.disabled_mods.contains("older"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.loader.environment = "toaster".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        let mut config = AppConfig::default();
        config.debug.replace_versions = "no-colon".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.loader.mods_directory.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = AppConfig::default();
        let args = Args {
            mods: Some(PathBuf::from("elsewhere")),
            environment: Some(Environment::Server),
            log_level: Some("warn".to_string()),
            json_logs: true,
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.loader.mods_directory, "elsewhere");
        assert_eq!(config.loader.environment, "server");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }
}
