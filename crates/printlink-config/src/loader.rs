//! Configuration loader with multi-source merging

use crate::{Paths, SdkConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    deploy_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default deploy directory (current dir)
    pub fn new() -> Self {
        Self {
            deploy_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "PLK".to_string(),
        }
    }

    /// Set the deploy directory (where printlink.toml lives)
    pub fn with_deploy_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.deploy_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "PLK")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<SdkConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = SdkConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/printlink/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Deployed device config (printlink.toml)
        let deploy_config_file = Paths::deploy_config_file(&self.deploy_dir);
        if deploy_config_file.exists() {
            builder = builder.add_source(
                config::File::from(deploy_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local overrides (printlink.local.toml)
        let local_config_file = Paths::local_config_file(&self.deploy_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (PLK_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let sdk_config: SdkConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(sdk_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> SdkConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_deploy_dir(temp_dir.path())
            .load()
            .expect("Failed to load config");

        assert_eq!(config.timing.telemetry_interval_secs, 1);
        assert!(config.connect.server_url.is_none());
    }

    #[test]
    fn test_deploy_file_overrides_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            Paths::deploy_config_file(temp_dir.path()),
            r#"
[printer]
serial_number = "SN1234567"
printer_type = "MINI"

[connect]
server_url = "https://connect.example.com"

[timing]
telemetry_interval_secs = 2
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_deploy_dir(temp_dir.path())
            .load()
            .expect("Failed to load config");

        assert_eq!(config.printer.serial_number, "SN1234567");
        assert_eq!(config.printer.printer_type, "MINI");
        assert_eq!(
            config.connect.server_url.as_deref(),
            Some("https://connect.example.com")
        );
        assert_eq!(config.timing.telemetry_interval_secs, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.transfer.workers, 2);
    }

    #[test]
    fn test_local_file_overrides_deploy_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            Paths::deploy_config_file(temp_dir.path()),
            "[printer]\nserial_number = \"SN-A\"\n",
        )
        .unwrap();
        fs::write(
            Paths::local_config_file(temp_dir.path()),
            "[printer]\nserial_number = \"SN-B\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_deploy_dir(temp_dir.path())
            .load()
            .expect("Failed to load config");
        assert_eq!(config.printer.serial_number, "SN-B");
    }
}
