//! Error types for buildkit-state
//!
//! All modules use `StateResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for buildkit-state operations
pub type StateResult<T> = Result<T, StateError>;

/// All errors that can occur while moving BuildKit state
#[derive(Error, Debug)]
pub enum StateError {
    // Environment errors
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to install {program}: {reason}")]
    CompressorInstall { program: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidConfigValue { key: String, reason: String },

    #[error("Cache key is required")]
    MissingCacheKey,

    #[error("Invalid cache key '{key}': {reason}")]
    InvalidCacheKey { key: String, reason: String },

    #[error("Unknown prune category '{0}'")]
    InvalidPruneType(String),

    #[error("Invalid long-distance window {0}: must be between 10 and 31")]
    InvalidWindow(u32),

    #[error("Invalid compression level {0}: must be between 1 and 22")]
    InvalidCompressionLevel(i32),

    // Container errors
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Path not found in container {container}: {path}")]
    PathNotFound { container: String, path: String },

    // Pipeline errors
    #[error("Failed to start stage '{stage}'")]
    ProcessSpawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' exited with code {code}{}", format_stderr(.stderr))]
    NonZeroExit {
        stage: String,
        code: i32,
        stderr: String,
    },

    #[error("Stage '{stage}' was terminated by a signal{}", format_stderr(.stderr))]
    StageTerminated { stage: String, stderr: String },

    #[error("Stream error in stage '{stage}'")]
    StreamIo {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    // Remote store errors
    #[error("Cache entry already exists: {0}")]
    CacheKeyExists(String),

    #[error("Checksum mismatch for cache entry {key}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl StateError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the error means the container or a path inside it could not be resolved
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_) | Self::PathNotFound { .. })
    }

    /// Name of the pipeline stage or command that failed, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::ProcessSpawn { stage, .. }
            | Self::NonZeroExit { stage, .. }
            | Self::StageTerminated { stage, .. }
            | Self::StreamIo { stage, .. } => Some(stage),
            Self::CommandFailed { command, .. } | Self::CommandExecution { command, .. } => {
                Some(command)
            }
            _ => None,
        }
    }

    /// Exit code reported by the failing stage, if it exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingCacheKey => Some("Pass --key or set BUILDKIT_STATE_CACHE_KEY"),
            Self::InvalidPruneType(_) => Some(
                "Valid categories: regular, source.local, source.git.checkout, \
                 exec.cachemount, frontend, internal",
            ),
            Self::ContainerNotFound(_) => Some(
                "Only the docker-container buildx driver is supported. \
                 Run: docker buildx create --use",
            ),
            Self::CompressorInstall { .. } => {
                Some("Install zstd manually and make sure it is on PATH")
            }
            _ => None,
        }
    }
}
