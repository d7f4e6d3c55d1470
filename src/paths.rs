//! Storage layout for the quota engine's durable state.
//!
//! All files live under a single root directory:
//! - `cache/quota_api_v1_plugin/<source>/<email-hash>.json` — raw API cache
//! - `cache/quota_history/<email-hash>.json` — compacted history
//!
//! The root is injected at construction so tests can redirect storage to a
//! temp directory. Filenames are a one-way hash of the normalized email so
//! they never leak raw addresses.

use crate::types::normalize_email;
use anyhow::{Context, Result};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "quota-watch";
const API_CACHE_DIR: &str = "quota_api_v1_plugin";
const HISTORY_DIR: &str = "quota_history";

/// Resolved storage locations, rooted at an injectable directory.
#[derive(Debug, Clone)]
pub struct QuotaPaths {
    root: PathBuf,
}

impl QuotaPaths {
    /// Creates paths rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates paths rooted at the per-user configuration directory.
    pub fn default_root() -> Result<Self> {
        let base = dirs::config_dir().context("Could not determine user configuration directory")?;
        Ok(Self::new(base.join(APP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding raw API cache records for one source.
    pub fn api_cache_dir(&self, source: &str) -> PathBuf {
        self.root.join("cache").join(API_CACHE_DIR).join(source)
    }

    /// Path of the raw API cache record for one account.
    pub fn api_cache_file(&self, source: &str, email: &str) -> PathBuf {
        self.api_cache_dir(source)
            .join(format!("{}.json", email_hash(email)))
    }

    /// Directory holding per-account history records.
    pub fn history_dir(&self) -> PathBuf {
        self.root.join("cache").join(HISTORY_DIR)
    }

    /// Path of the history record for one account.
    pub fn history_file(&self, email: &str) -> PathBuf {
        self.history_dir()
            .join(format!("{}.json", email_hash(email)))
    }
}

/// SHA-256 of the normalized email, lowercase hex.
pub fn email_hash(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_email(email).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Writes `contents` to `path` atomically.
///
/// Serializes to a temp file in the same directory, then renames over the
/// final path, so a reader never observes a partially-written record. The
/// temp name embeds a timestamp and a random suffix; two processes writing
/// the same logical record race on the rename, not the temp file
/// (last-write-wins).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .context("Storage path has no parent directory")?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;

    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let suffix: u32 = rand::thread_rng().gen();
    let tmp = dir.join(format!(
        ".{}.{}.{:08x}.tmp",
        stem,
        crate::types::now_ms(),
        suffix
    ));

    fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to commit record: {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_email_hash_normalizes_first() {
        assert_eq!(email_hash("  User@Example.com "), email_hash("user@example.com"));
        assert_eq!(email_hash("a@b.c").len(), 64);
    }

    #[test]
    fn test_cache_paths_never_contain_raw_email() {
        let paths = QuotaPaths::new("/tmp/qw-test");
        let file = paths.api_cache_file("plugin", "secret@example.com");
        assert!(!file.to_string_lossy().contains("secret"));
        assert!(file.to_string_lossy().contains("quota_api_v1_plugin/plugin"));

        let hist = paths.history_file("secret@example.com");
        assert!(hist.to_string_lossy().contains("quota_history"));
        assert!(!hist.to_string_lossy().contains("secret"));
    }

    #[test]
    fn test_write_atomic_creates_dirs_and_commits() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a").join("b").join("rec.json");
        write_atomic(&target, "{\"v\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"v\":1}");

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_atomic_overwrites_previous() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("rec.json");
        write_atomic(&target, "old").unwrap();
        write_atomic(&target, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }
}
