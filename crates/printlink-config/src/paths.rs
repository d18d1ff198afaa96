//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for Printlink
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("io", "Printlink", "printlink"),
        }
    }

    /// Get user config directory (~/.config/printlink/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/printlink/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get deployment config file path (printlink.toml)
    pub fn deploy_config_file(deploy_dir: impl AsRef<Path>) -> PathBuf {
        deploy_dir.as_ref().join("printlink.toml")
    }

    /// Get local override file path (printlink.local.toml, not deployed)
    pub fn local_config_file(deploy_dir: impl AsRef<Path>) -> PathBuf {
        deploy_dir.as_ref().join("printlink.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();
        if let Ok(config_dir) = paths.user_config_dir() {
            assert!(config_dir.to_string_lossy().contains("printlink"));
        }
    }

    #[test]
    fn test_deploy_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let deploy_dir = temp_dir.path();

        assert_eq!(
            Paths::deploy_config_file(deploy_dir),
            deploy_dir.join("printlink.toml")
        );
        assert_eq!(
            Paths::local_config_file(deploy_dir),
            deploy_dir.join("printlink.local.toml")
        );
    }
}
