//! Run-wide transfer settings
//!
//! Built once at the start of a run from the merged configuration, then
//! passed by reference through every phase.

use crate::cache::{CacheKey, PruneTypeSet};
use crate::compression::CompressionWindow;
use crate::config::schema::CompressionConfig;
use crate::config::{Config, ConfigManager};
use crate::error::{StateError, StateResult};
use crate::orchestration::ContainerHandle;
use std::path::PathBuf;

/// Settings shared by every phase of one transfer
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Primary key and fallbacks
    pub key: CacheKey,
    /// buildx builder name
    pub builder: String,
    /// Container backing the builder
    pub container: ContainerHandle,
    /// State directory read on save
    pub state_dir: String,
    /// Directory the archive is extracted into on restore
    pub restore_dir: String,
    /// Categories retained across a save
    pub keep: PruneTypeSet,
    /// Negotiated long-distance window
    pub window: Option<CompressionWindow>,
    /// Save even if the restored key is unchanged
    pub rewrite: bool,
    /// Restart the builder after the transfer
    pub resume: bool,
    /// Local archive path owned by the transfer
    pub archive_path: PathBuf,
    /// Restored key to compare against instead of the persisted record
    pub restored_key: Option<String>,
}

impl TransferSettings {
    /// Build settings from configuration and the negotiated window
    pub fn from_config(config: &Config, window: Option<CompressionWindow>) -> StateResult<Self> {
        let primary = config
            .cache
            .key
            .clone()
            .ok_or(StateError::MissingCacheKey)?;
        let key = CacheKey::new(primary, config.cache.restore_keys.clone())?;
        let keep = PruneTypeSet::parse(&config.prune.keep)?;

        Ok(Self {
            key,
            builder: config.builder.name.clone(),
            container: ContainerHandle::new(
                &config.builder.name,
                config.builder.container.as_deref(),
            ),
            state_dir: config.builder.state_dir.clone(),
            restore_dir: config.builder.restore_dir.clone(),
            keep,
            window,
            rewrite: config.cache.rewrite,
            resume: config.builder.resume,
            archive_path: config
                .cache
                .archive_path
                .clone()
                .unwrap_or_else(|| ConfigManager::default_archive_path(&config.builder.name)),
            restored_key: None,
        })
    }

    /// Compare against `key` instead of the persisted restore record
    pub fn with_restored_key(mut self, key: Option<String>) -> Self {
        self.restored_key = key.filter(|k| !k.trim().is_empty());
        self
    }
}

/// Validate the configured window, if any
pub fn configured_window(config: &CompressionConfig) -> StateResult<Option<CompressionWindow>> {
    config.long_window.map(CompressionWindow::new).transpose()
}
