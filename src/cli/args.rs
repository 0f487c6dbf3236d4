//! CLI argument definitions using clap derive

use crate::cache::parse_restore_keys;
use crate::config::Config;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// buildkit-state - persist BuildKit cache state across CI runs
///
/// Restores a builder's state directory from a key-addressed cache store
/// before a build and saves it again afterwards.
#[derive(Parser, Debug)]
#[command(name = "buildkit-state")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUILDKIT_STATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse the `general.log_format` config value
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore builder state from the cache store
    #[command(alias = "load")]
    Restore(RestoreArgs),

    /// Save builder state to the cache store
    Save(SaveArgs),

    /// Check the compressor and long-distance matching support
    Probe(ProbeArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Options shared by restore and save
#[derive(Args, Debug, Default, Clone)]
pub struct TransferArgs {
    /// Primary cache key
    #[arg(short, long, env = "BUILDKIT_STATE_CACHE_KEY")]
    pub key: Option<String>,

    /// buildx builder name
    #[arg(short, long, env = "BUILDKIT_STATE_BUILDER")]
    pub builder: Option<String>,

    /// Container name (defaults to buildx_buildkit_<builder>0)
    #[arg(long, env = "BUILDKIT_STATE_CONTAINER")]
    pub container: Option<String>,

    /// Cache store directory
    #[arg(long, env = "BUILDKIT_STATE_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Local archive path used during the transfer
    #[arg(long, env = "BUILDKIT_STATE_ARCHIVE")]
    pub archive_path: Option<PathBuf>,

    /// zstd compression level (1-22)
    #[arg(long)]
    pub compression_level: Option<i32>,

    /// Log2 long-distance matching window (10-31)
    #[arg(long)]
    pub long_window: Option<u32>,

    /// Disable long-distance matching
    #[arg(long, conflicts_with = "long_window")]
    pub no_long_window: bool,

    /// zstd worker threads (0 = one per core)
    #[arg(long)]
    pub threads: Option<u32>,

    /// Leave the builder stopped after the transfer
    #[arg(long)]
    pub no_resume: bool,

    /// Do not install zstd if it is missing
    #[arg(long)]
    pub no_install: bool,
}

impl TransferArgs {
    /// Override configuration values with explicitly given options
    pub fn apply(&self, config: &mut Config) {
        if let Some(key) = &self.key {
            config.cache.key = Some(key.clone());
        }
        if let Some(builder) = &self.builder {
            config.builder.name = builder.clone();
        }
        if let Some(container) = &self.container {
            config.builder.container = Some(container.clone());
        }
        if let Some(dir) = &self.store_dir {
            config.cache.store_dir = Some(dir.clone());
        }
        if let Some(path) = &self.archive_path {
            config.cache.archive_path = Some(path.clone());
        }
        if let Some(level) = self.compression_level {
            config.compression.level = level;
        }
        if self.no_long_window {
            config.compression.long_window = None;
        } else if let Some(window) = self.long_window {
            config.compression.long_window = Some(window);
        }
        if let Some(threads) = self.threads {
            config.compression.threads = threads;
        }
        if self.no_resume {
            config.builder.resume = false;
        }
        if self.no_install {
            config.compression.auto_install = false;
        }
    }
}

/// Arguments for the restore command
#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Fallback key prefixes, comma or newline separated, in preference order
    #[arg(short, long, env = "BUILDKIT_STATE_RESTORE_KEYS")]
    pub restore_keys: Vec<String>,
}

impl RestoreArgs {
    /// Override configuration values with explicitly given options
    pub fn apply(&self, config: &mut Config) {
        self.transfer.apply(config);
        if !self.restore_keys.is_empty() {
            config.cache.restore_keys = self
                .restore_keys
                .iter()
                .flat_map(|k| parse_restore_keys(k))
                .collect();
        }
    }
}

/// Arguments for the save command
#[derive(Args, Debug)]
pub struct SaveArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Cache categories to keep, comma separated (others are pruned)
    #[arg(long, env = "BUILDKIT_STATE_KEEP", value_delimiter = ',')]
    pub keep: Option<Vec<String>>,

    /// Save even if the state was restored from the same key
    #[arg(long, env = "BUILDKIT_STATE_REWRITE")]
    pub rewrite: bool,

    /// Key the state was restored from (defaults to the recorded key)
    #[arg(long, env = "BUILDKIT_STATE_RESTORED_KEY")]
    pub restored_key: Option<String>,
}

impl SaveArgs {
    /// Override configuration values with explicitly given options
    pub fn apply(&self, config: &mut Config) {
        self.transfer.apply(config);
        if let Some(keep) = &self.keep {
            config.prune.keep = keep.clone();
        }
        if self.rewrite {
            config.cache.rewrite = true;
        }
    }
}

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Compressor program to probe
    #[arg(long)]
    pub program: Option<String>,

    /// Log2 long-distance matching window to check
    #[arg(long)]
    pub long_window: Option<u32>,

    /// Do not install zstd if it is missing
    #[arg(long)]
    pub no_install: bool,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., builder.name)
        key: String,

        /// Value to set
        value: String,
    },
}
