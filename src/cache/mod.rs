//! Cache keys, pruning and the remote store
//!
//! | Piece | Role |
//! |-------|------|
//! | [`key`] | Key validation and the save gate |
//! | [`prune`] | Category removal before a save |
//! | [`store`] | Store contract and the directory-backed store |

pub mod key;
pub mod prune;
pub mod store;

pub use key::{parse_restore_keys, should_save, validate_key, CacheKey};
pub use prune::{prune_all, PruneFailure, PruneReport, PruneType, PruneTypeSet};
pub use store::{LocalStore, RemoteStore};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
