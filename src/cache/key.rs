//! Cache keys and the save gate

use crate::error::{StateError, StateResult};

/// Primary cache key plus ordered fallback prefixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    primary: String,
    fallbacks: Vec<String>,
}

impl CacheKey {
    /// Validate and build a cache key. Blank fallbacks are dropped.
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> StateResult<Self> {
        let primary = primary.into().trim().to_string();
        if primary.is_empty() {
            return Err(StateError::MissingCacheKey);
        }
        validate_key(&primary)?;

        let fallbacks = fallbacks
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .map(|f| validate_key(&f).map(|_| f))
            .collect::<StateResult<Vec<_>>>()?;

        Ok(Self { primary, fallbacks })
    }

    /// Exact key used for saving and preferred on restore
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Prefixes tried in order when the primary key misses
    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }
}

/// Reject keys that cannot safely name a store entry
pub fn validate_key(key: &str) -> StateResult<()> {
    let reason = if key.is_empty() {
        Some("must not be empty")
    } else if key == "." || key == ".." {
        Some("must not be a relative path component")
    } else if key.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if key.contains(['\0', '\n', '\r']) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StateError::InvalidCacheKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Split a restore-keys input into individual keys.
///
/// Accepts one key per line as well as comma-separated lists.
pub fn parse_restore_keys(input: &str) -> Vec<String> {
    input
        .split(['\n', ','])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Whether a save is required.
///
/// Returns false only when the state was restored from exactly `current`
/// and no rewrite was forced.
pub fn should_save(last_restored: Option<&str>, current: &str, force_rewrite: bool) -> bool {
    force_rewrite || last_restored != Some(current)
}
