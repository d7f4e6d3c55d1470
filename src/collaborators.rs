//! External collaborator interfaces consumed by the core.
//!
//! The network fetch, the credential vault and the account discovery
//! channel all live outside this crate; the engine reaches them through
//! these traits so tests can substitute mocks.

use crate::types::QuotaSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Fetches quota snapshots from the upstream API.
#[async_trait]
pub trait QuotaFetcher: Send + Sync {
    /// Performs the network fetch for one account. Errors are reported as
    /// message strings downstream; the raw text also drives error
    /// classification.
    async fn fetch_quota(&self, email: &str, force_refresh: bool)
        -> anyhow::Result<QuotaSnapshot>;

    /// Rebuilds a snapshot from a cached raw payload without a network
    /// round trip. `None` when the payload is no longer understood.
    fn snapshot_from_cached_payload(
        &self,
        payload: &serde_json::Value,
        updated_at: i64,
    ) -> Option<QuotaSnapshot>;
}

/// Per-account credential status as known by the external vault.
#[derive(Debug, Clone, Default)]
pub struct CredentialInfo {
    pub is_invalid: bool,
    pub is_forbidden: bool,
    pub expires_at: Option<i64>,
}

/// Read/annotate access to the external credential vault.
pub trait CredentialStore: Send + Sync {
    /// All known credentials, keyed by normalized email.
    fn all_credentials(&self) -> HashMap<String, CredentialInfo>;

    fn mark_forbidden(&self, email: &str, forbidden: bool);

    fn clear_forbidden(&self, email: &str);
}

/// Basic identity of a discovered account.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub email: String,
    pub external_id: Option<String>,
    pub is_current: bool,
    pub device_bound: bool,
    pub tier: Option<String>,
}

/// Supplies the current set of known accounts (realtime or file-based).
#[async_trait]
pub trait AccountLister: Send + Sync {
    fn list_accounts(&self) -> Vec<AccountInfo>;

    /// Waits until the realtime channel is connected, up to `timeout`.
    /// Returns whether it connected in time.
    async fn wait_connected(&self, timeout: Duration) -> bool;
}
