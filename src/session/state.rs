//! Restored key persistence
//!
//! `restore` and `save` run as separate processes, usually in the pre and
//! post steps of a CI job. The key that produced the restore is written to
//! the state directory so the save gate can compare against it later.

use crate::config::ConfigManager;
use crate::error::{StateError, StateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Output name published after a successful restore
pub const RESTORED_KEY_OUTPUT: &str = "restored-cache-key";

/// Key that produced the last restore for a builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredKeyRecord {
    /// Builder the state was restored into
    pub builder: String,

    /// Matched cache key
    pub key: String,

    /// When the restore completed
    pub restored_at: DateTime<Utc>,
}

/// Reads and writes restored key records
#[derive(Debug, Clone)]
pub struct RestoredKeyStore {
    dir: PathBuf,
    github_output: Option<PathBuf>,
}

impl RestoredKeyStore {
    /// Store records in `dir`, without publishing outputs
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            github_output: None,
        }
    }

    /// Store records in the state directory, publishing to `$GITHUB_OUTPUT` if set
    pub fn from_env() -> Self {
        Self {
            dir: ConfigManager::state_dir(),
            github_output: std::env::var_os("GITHUB_OUTPUT")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Also publish outputs to the given file
    pub fn with_github_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.github_output = Some(path.into());
        self
    }

    /// Get record file path
    pub fn file_path(&self, builder: &str) -> PathBuf {
        let safe: String = builder
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("restored-{}.json", safe))
    }

    /// Load the record for `builder`, if any
    pub async fn load(&self, builder: &str) -> StateResult<Option<RestoredKeyRecord>> {
        let path = self.file_path(builder);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::io(format!("reading state file {}", path.display()), e))?;

        let record: RestoredKeyRecord = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Record `key` as restored into `builder` and publish it
    pub async fn record(&self, builder: &str, key: &str) -> StateResult<RestoredKeyRecord> {
        let record = RestoredKeyRecord {
            builder: builder.to_string(),
            key: key.to_string(),
            restored_at: Utc::now(),
        };
        let path = self.file_path(builder);

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StateError::io("creating state directory", e))?;

        let content = serde_json::to_string_pretty(&record)?;
        fs::write(&path, content)
            .await
            .map_err(|e| StateError::io(format!("writing state file {}", path.display()), e))?;
        debug!("Recorded restored key {} in {}", key, path.display());

        if let Some(output) = &self.github_output {
            append_output(output, RESTORED_KEY_OUTPUT, key).await?;
        }

        Ok(record)
    }

    /// Forget the record for `builder`
    pub async fn clear(&self, builder: &str) -> StateResult<()> {
        let path = self.file_path(builder);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| StateError::io(format!("deleting state file {}", path.display()), e))?;
        }
        Ok(())
    }
}

/// Append `name=value` to a GitHub Actions output file
pub async fn append_output(path: &Path, name: &str, value: &str) -> StateResult<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StateError::io(format!("opening output file {}", path.display()), e))?;

    file.write_all(format!("{}={}\n", name, value).as_bytes())
        .await
        .map_err(|e| StateError::io(format!("writing output file {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| StateError::io(format!("writing output file {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn record_load_clear() {
        let temp = TempDir::new().unwrap();
        let store = RestoredKeyStore::new(temp.path().join("state"));

        assert!(store.load("ci").await.unwrap().is_none());

        let record = store.record("ci", "build-41").await.unwrap();
        let loaded = store.load("ci").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.key, "build-41");

        store.clear("ci").await.unwrap();
        assert!(store.load("ci").await.unwrap().is_none());
        store.clear("ci").await.unwrap();
    }

    #[tokio::test]
    async fn records_are_per_builder() {
        let temp = TempDir::new().unwrap();
        let store = RestoredKeyStore::new(temp.path());

        store.record("a", "key-a").await.unwrap();
        store.record("b", "key-b").await.unwrap();

        assert_eq!(store.load("a").await.unwrap().unwrap().key, "key-a");
        assert_eq!(store.load("b").await.unwrap().unwrap().key, "key-b");
    }

    #[test]
    fn file_path_is_sanitized() {
        let store = RestoredKeyStore::new("/state");
        assert_eq!(
            store.file_path("../evil/name"),
            PathBuf::from("/state/restored-.._evil_name.json")
        );
    }

    #[tokio::test]
    async fn record_publishes_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("github_output");
        std::fs::write(&output, "existing=1\n").unwrap();
        let store = RestoredKeyStore::new(temp.path()).with_github_output(&output);

        store.record("ci", "build-41").await.unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content, "existing=1\nrestored-cache-key=build-41\n");
    }

    #[test]
    #[serial]
    fn from_env_reads_github_output() {
        std::env::set_var("GITHUB_OUTPUT", "/tmp/gh-output");
        let store = RestoredKeyStore::from_env();
        std::env::remove_var("GITHUB_OUTPUT");
        assert_eq!(store.github_output, Some(PathBuf::from("/tmp/gh-output")));

        let store = RestoredKeyStore::from_env();
        assert_eq!(store.github_output, None);
    }
}
