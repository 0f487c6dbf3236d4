//! Configuration management for buildkit-state

pub mod schema;

pub use schema::Config;

use crate::error::{StateError, StateResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

static ARCHIVE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildkit-state")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildkit-state")
    }

    /// Default local archive path for one transfer of `builder`.
    ///
    /// Unique per builder, process and call, so concurrent transfers on one
    /// host never share a file.
    pub fn default_archive_path(builder: &str) -> PathBuf {
        let sequence = ARCHIVE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let builder: String = builder
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
            .collect();
        std::env::temp_dir().join(format!(
            "buildkit-state-{}-{}-{}.tar.zst",
            builder,
            std::process::id(),
            sequence
        ))
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> StateResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StateResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StateError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| StateError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StateResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StateError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StateResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.builder.state_dir, "/var/lib/buildkit");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.builder.name = "ci-builder".to_string();
        config.cache.restore_keys = vec!["linux-".to_string()];

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.builder.name, "ci-builder");
        assert_eq!(loaded.cache.restore_keys, ["linux-"]);
    }

    #[test]
    fn default_archive_paths_are_distinct() {
        let a = ConfigManager::default_archive_path("ci");
        let b = ConfigManager::default_archive_path("ci");
        let other = ConfigManager::default_archive_path("release/x");

        assert_ne!(a, b);
        assert_ne!(a, other);
        assert!(a.starts_with(std::env::temp_dir()));
        let name = other.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("buildkit-state-release_x-"));
        assert!(name.ends_with(".tar.zst"));
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[compression]\nlevel = \"high\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        assert!(matches!(err, StateError::ConfigInvalid { path: p, .. } if p == path));
    }
}
