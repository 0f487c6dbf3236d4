//! Configuration schema for buildkit-state
//!
//! Configuration is stored at `~/.config/buildkit-state/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Builder and container settings
    pub builder: BuilderConfig,

    /// Cache key and store settings
    pub cache: CacheConfig,

    /// Pruning before save
    pub prune: PruneConfig,

    /// Compressor settings
    pub compression: CompressionConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// buildx builder name
    pub name: String,

    /// Explicit container name, overriding `buildx_buildkit_<name>0`
    pub container: Option<String>,

    /// Container CLI program
    pub runtime: String,

    /// BuildKit state directory inside the container
    pub state_dir: String,

    /// Directory the state archive is extracted into on restore
    pub restore_dir: String,

    /// Restart the builder after a transfer
    pub resume: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            name: "builder".to_string(),
            container: None,
            runtime: "docker".to_string(),
            state_dir: "/var/lib/buildkit".to_string(),
            restore_dir: "/var/lib".to_string(),
            resume: true,
        }
    }
}

/// Cache key and store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Primary cache key
    pub key: Option<String>,

    /// Fallback prefixes, in preference order
    pub restore_keys: Vec<String>,

    /// Save even if the restored key equals the current key
    pub rewrite: bool,

    /// Local store directory (defaults to the user cache dir)
    pub store_dir: Option<PathBuf>,

    /// Local archive path used during transfers
    pub archive_path: Option<PathBuf>,
}

/// Prune configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    /// Cache categories retained across a save
    pub keep: Vec<String>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            keep: vec!["exec.cachemount".to_string(), "frontend".to_string()],
        }
    }
}

/// Compressor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compressor program
    pub program: String,

    /// Compression level (1-22)
    pub level: i32,

    /// Worker threads, 0 for one per core
    pub threads: u32,

    /// Log2 long-distance-matching window, if wanted
    pub long_window: Option<u32>,

    /// Install the compressor if it is missing
    pub auto_install: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            program: "zstd".to_string(),
            level: 19,
            threads: 0,
            long_window: Some(27),
            auto_install: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[builder]"));
        assert!(toml.contains("[compression]"));
        assert!(toml.contains("state_dir = \"/var/lib/buildkit\""));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [builder]
            name = "ci"

            [compression]
            level = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.builder.name, "ci");
        assert_eq!(config.builder.runtime, "docker");
        assert_eq!(config.compression.level, 3);
        assert_eq!(config.compression.long_window, Some(27));
        assert_eq!(config.prune.keep, ["exec.cachemount", "frontend"]);
        assert!(config.cache.key.is_none());
    }
}
