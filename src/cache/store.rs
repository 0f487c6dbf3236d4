//! Remote store contract and a directory-backed implementation
//!
//! # Layout
//!
//! ```text
//! <root>/v1/<key>/part-<n>
//! <root>/v1/<key>/part-<n>.sha256
//! ```
//!
//! Part `n` holds the `n`th path given to `save`. Entry files do not depend
//! on the caller's file names, so save and restore may use different paths.
//!
//! Entries are written to a hidden staging directory and renamed into place,
//! so a visible entry is always complete. Entries are immutable: saving an
//! existing key fails with [`StateError::CacheKeyExists`].

use crate::cache::key::validate_key;
use crate::error::{StateError, StateResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const LAYOUT_VERSION: &str = "v1";
const CHECKSUM_SUFFIX: &str = ".sha256";
const STAGING_PREFIX: &str = ".staging-";
const PART_PREFIX: &str = "part-";

/// Key-addressed durable storage for state archives
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the best matching entry into `paths`.
    ///
    /// Tries the exact `primary` key first, then each fallback prefix in
    /// order. Returns the key that matched, or `None` on a miss.
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary: &str,
        fallbacks: &[String],
    ) -> StateResult<Option<String>>;

    /// Upload `paths` under `key`. Fails with `CacheKeyExists` on a duplicate.
    async fn save(&self, paths: &[PathBuf], key: &str) -> StateResult<()>;

    /// Human-readable store description for display
    fn store_name(&self) -> String;
}

/// Remote store backed by a local (or mounted) directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default store location under the user cache directory
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildkit-state")
            .join("store")
    }

    /// Directory containing every entry
    fn entries_dir(&self) -> PathBuf {
        self.root.join(LAYOUT_VERSION)
    }

    /// Directory of a single entry
    pub fn entry_dir(&self, key: &str) -> PathBuf {
        self.entries_dir().join(key)
    }

    /// Whether a complete entry exists for `key`
    pub async fn contains(&self, key: &str) -> bool {
        fs::metadata(self.entry_dir(key))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolve the key a restore would use
    pub async fn find_match(
        &self,
        primary: &str,
        fallbacks: &[String],
    ) -> StateResult<Option<String>> {
        if self.contains(primary).await {
            return Ok(Some(primary.to_string()));
        }

        for prefix in fallbacks {
            if self.contains(prefix).await {
                return Ok(Some(prefix.clone()));
            }
            if let Some(key) = self.newest_with_prefix(prefix).await? {
                return Ok(Some(key));
            }
        }

        Ok(None)
    }

    async fn newest_with_prefix(&self, prefix: &str) -> StateResult<Option<String>> {
        let dir = self.entries_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(format!("reading store {}", dir.display()), e)),
        };

        let mut newest: Option<(SystemTime, String)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(format!("reading store {}", dir.display()), e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            // Ties resolve to the lexicographically larger key
            let newer = match &newest {
                Some((time, key)) => (modified, &name) > (*time, key),
                None => true,
            };
            if newer {
                newest = Some((modified, name));
            }
        }

        Ok(newest.map(|(_, key)| key))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary: &str,
        fallbacks: &[String],
    ) -> StateResult<Option<String>> {
        let Some(key) = self.find_match(primary, fallbacks).await? else {
            debug!("No entry matches {} or {:?}", primary, fallbacks);
            return Ok(None);
        };

        let entry = self.entry_dir(&key);
        for (index, path) in paths.iter().enumerate() {
            let name = part_name(index);
            let stored = entry.join(&name);

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StateError::io(format!("creating {}", parent.display()), e))?;
            }
            fs::copy(&stored, path).await.map_err(|e| {
                StateError::io(format!("copying {} from store", stored.display()), e)
            })?;

            let sidecar = entry.join(format!("{}{}", name, CHECKSUM_SUFFIX));
            let expected = fs::read_to_string(&sidecar)
                .await
                .map_err(|e| StateError::io(format!("reading checksum {}", sidecar.display()), e))?;
            let expected = expected.trim().to_string();
            let actual = sha256_file(path).await?;
            if actual != expected {
                let _ = fs::remove_file(path).await;
                return Err(StateError::ChecksumMismatch { key, expected, actual });
            }
        }

        info!("Restored entry {} from {}", key, self.root.display());
        Ok(Some(key))
    }

    async fn save(&self, paths: &[PathBuf], key: &str) -> StateResult<()> {
        validate_key(key)?;
        if self.contains(key).await {
            return Err(StateError::CacheKeyExists(key.to_string()));
        }

        let staging = self
            .entries_dir()
            .join(format!("{}{}-{}", STAGING_PREFIX, key, std::process::id()));
        let result = self.stage_entry(&staging, paths).await;
        let result = match result {
            Ok(()) => self.publish(&staging, key).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = fs::remove_dir_all(&staging).await;
        }
        result?;

        info!("Saved entry {} to {}", key, self.root.display());
        Ok(())
    }

    fn store_name(&self) -> String {
        format!("local store at {}", self.root.display())
    }
}

impl LocalStore {
    async fn stage_entry(&self, staging: &Path, paths: &[PathBuf]) -> StateResult<()> {
        if fs::metadata(staging).await.is_ok() {
            fs::remove_dir_all(staging)
                .await
                .map_err(|e| StateError::io(format!("clearing {}", staging.display()), e))?;
        }
        fs::create_dir_all(staging)
            .await
            .map_err(|e| StateError::io(format!("creating {}", staging.display()), e))?;

        for (index, path) in paths.iter().enumerate() {
            let name = part_name(index);
            fs::copy(path, staging.join(&name))
                .await
                .map_err(|e| StateError::io(format!("copying {} to store", path.display()), e))?;

            let checksum = sha256_file(path).await?;
            let sidecar = staging.join(format!("{}{}", name, CHECKSUM_SUFFIX));
            fs::write(&sidecar, format!("{}\n", checksum))
                .await
                .map_err(|e| StateError::io(format!("writing checksum {}", sidecar.display()), e))?;
        }
        Ok(())
    }

    async fn publish(&self, staging: &Path, key: &str) -> StateResult<()> {
        let target = self.entry_dir(key);
        if self.contains(key).await {
            return Err(StateError::CacheKeyExists(key.to_string()));
        }
        fs::rename(staging, &target)
            .await
            .map_err(|e| StateError::io(format!("publishing entry {}", target.display()), e))
    }
}

/// Entry file holding the `index`th saved path
pub fn part_name(index: usize) -> String {
    format!("{}{}", PART_PREFIX, index)
}

/// Hex-encoded SHA-256 of a file's contents
pub async fn sha256_file(path: &Path) -> StateResult<String> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| StateError::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| StateError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
