//! Data types shared across the quota engine.

use serde::{Deserialize, Serialize};

/// Remaining quota for a single upstream model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelQuotaEntry {
    pub model_id: String,
    pub label: String,
    /// Remaining allowance as a percentage, 0–100.
    pub remaining_percentage: f64,
    /// RFC3339 timestamp at which the upstream window resets, if reported.
    pub reset_time: Option<String>,
    #[serde(default)]
    pub exhausted: bool,
}

/// Aggregated view of one tracked model group, as reported by the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaGroupSummary {
    pub group_id: String,
    pub label: String,
    pub remaining_percentage: f64,
}

/// A point-in-time read of remaining usage allowance for one account.
///
/// Produced by the external fetcher and immutable afterwards. `payload` is
/// the opaque upstream response body; the coordinator persists it so that a
/// later process can rebuild a snapshot without a network round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Epoch milliseconds at which the snapshot was taken.
    pub timestamp: i64,
    pub connected: bool,
    pub error: Option<String>,
    pub models: Vec<ModelQuotaEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped: Option<Vec<QuotaGroupSummary>>,
    pub payload: serde_json::Value,
}

/// Durable per-account state owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub email: String,
    pub external_id: Option<String>,
    pub is_current: bool,
    pub device_bound: bool,
    pub has_credential: bool,
    pub tier: Option<String>,
    /// Authorization expired; cleared only by an explicit re-auth.
    pub is_invalid: bool,
    pub invalid_reason: Option<String>,
    /// Access denied by the upstream (403); automatic refreshes skip the
    /// account while set.
    pub is_forbidden: bool,
    pub forbidden_reason: Option<String>,
    pub credential_expires_at: Option<i64>,
}

impl AccountState {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            external_id: None,
            is_current: false,
            device_bound: false,
            has_credential: false,
            tier: None,
            is_invalid: false,
            invalid_reason: None,
            is_forbidden: false,
            forbidden_reason: None,
            credential_expires_at: None,
        }
    }
}

/// In-memory quota view per account; rebuilt on every process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountQuotaCache {
    pub snapshot: Option<QuotaSnapshot>,
    /// Epoch milliseconds of the last completed refresh attempt.
    pub fetched_at: Option<i64>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Options for a refresh request.
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    pub force_refresh: bool,
    /// Free-form reason used for logging ("startup", "manual", "auto", ...).
    pub reason: String,
}

impl RefreshOptions {
    pub fn with_reason(reason: &str) -> Self {
        Self {
            force_refresh: false,
            reason: reason.to_string(),
        }
    }

    pub fn forced(reason: &str) -> Self {
        Self {
            force_refresh: true,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a single account refresh. Errors are carried as strings; the
/// coordinator never propagates them as panics or `Err`.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub success: bool,
    pub from_cache: bool,
    pub snapshot: Option<QuotaSnapshot>,
    pub error: Option<String>,
}

impl RefreshResult {
    pub fn fetched(snapshot: QuotaSnapshot) -> Self {
        Self {
            success: true,
            from_cache: false,
            snapshot: Some(snapshot),
            error: None,
        }
    }

    pub fn cached(snapshot: QuotaSnapshot) -> Self {
        Self {
            success: true,
            from_cache: true,
            snapshot: Some(snapshot),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            from_cache: false,
            snapshot: None,
            error: Some(error.into()),
        }
    }
}

/// Normalizes an email for use as a map key or hash input.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }

    #[test]
    fn test_refresh_result_constructors() {
        let failed = RefreshResult::failed("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(!failed.from_cache);
    }
}
