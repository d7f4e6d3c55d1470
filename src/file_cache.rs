//! Durable, TTL-gated, cross-process cache of raw quota API responses.
//!
//! One JSON file per (source, account), keyed by a hash of the normalized
//! email. Reads never fail: a missing, unparsable, or mismatched file is
//! treated as absent. Writes are atomic (temp + rename) with last-write-wins
//! semantics across processes; records are idempotent re-fetch results, so
//! no cross-process lock is needed.

use crate::paths::{write_atomic, QuotaPaths};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Default freshness window for a cached record.
pub const DEFAULT_TTL_MS: i64 = 60_000;

const RECORD_VERSION: u32 = 1;

/// Durable cache record for one account's latest raw quota response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaApiCacheRecord {
    pub version: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_source: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Epoch milliseconds of the fetch that produced `payload`.
    pub updated_at: i64,
    /// Opaque upstream response body.
    pub payload: serde_json::Value,
}

impl QuotaApiCacheRecord {
    pub fn new(source: &str, email: &str, updated_at: i64, payload: serde_json::Value) -> Self {
        Self {
            version: RECORD_VERSION,
            source: source.to_string(),
            custom_source: None,
            email: email.to_string(),
            project_id: None,
            updated_at,
            payload,
        }
    }
}

/// File-backed cache of [`QuotaApiCacheRecord`]s.
#[derive(Debug, Clone)]
pub struct FileCache {
    paths: QuotaPaths,
}

impl FileCache {
    pub fn new(paths: QuotaPaths) -> Self {
        Self { paths }
    }

    /// Reads the cached record for an account, or `None` if no usable record
    /// exists. Missing files, unparsable content, version mismatches and
    /// source mismatches are all treated as absent; this never errors.
    pub fn read(&self, source: &str, email: &str) -> Option<QuotaApiCacheRecord> {
        let path = self.paths.api_cache_file(source, email);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return None,
        };
        let record: QuotaApiCacheRecord = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Discarding unparsable quota cache {}: {}", path.display(), e);
                return None;
            }
        };
        if record.version != RECORD_VERSION {
            tracing::debug!(
                "Discarding quota cache {} with version {}",
                path.display(),
                record.version
            );
            return None;
        }
        if record.source != source {
            tracing::debug!(
                "Discarding quota cache {} for source {} (wanted {})",
                path.display(),
                record.source,
                source
            );
            return None;
        }
        Some(record)
    }

    /// Persists a record atomically, creating directories as needed.
    pub fn write(&self, record: &QuotaApiCacheRecord) -> Result<()> {
        let path = self.paths.api_cache_file(&record.source, &record.email);
        let content =
            serde_json::to_string(record).context("Failed to serialize quota cache record")?;
        write_atomic(&path, &content)
    }

    /// True iff the record is younger than `ttl_ms`.
    pub fn is_valid(record: &QuotaApiCacheRecord, ttl_ms: i64) -> bool {
        Self::is_valid_at(record, ttl_ms, crate::types::now_ms())
    }

    pub fn is_valid_at(record: &QuotaApiCacheRecord, ttl_ms: i64, now_ms: i64) -> bool {
        now_ms - record.updated_at < ttl_ms
    }

    /// Age of the record in milliseconds.
    pub fn age_ms(record: &QuotaApiCacheRecord) -> i64 {
        crate::types::now_ms() - record.updated_at
    }
}
