//! Per-account refresh coordination.
//!
//! Guarantees at most one in-flight network fetch per normalized email:
//! concurrent callers wait for the in-flight fetch and are then served from
//! the freshly-written disk cache instead of fetching again. The
//! coordinator is a fault barrier: fetch failures come back as
//! [`RefreshResult`] errors, never as `Err` or panics.

use crate::collaborators::{CredentialStore, QuotaFetcher};
use crate::file_cache::{FileCache, QuotaApiCacheRecord, DEFAULT_TTL_MS};
use crate::history::HistoryStore;
use crate::types::{normalize_email, now_ms, RefreshOptions, RefreshResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How long a caller waits for another caller's in-flight fetch before
/// giving up with an error result.
pub const IN_FLIGHT_WAIT_BUDGET: Duration = Duration::from_secs(30);

/// Deduplicating, cache-aware refresh driver for all accounts.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    source: String,
    cache: FileCache,
    history: HistoryStore,
    fetcher: Arc<dyn QuotaFetcher>,
    credentials: Arc<dyn CredentialStore>,
    /// Emails with a fetch currently in flight. Checked and claimed under
    /// the lock, with no suspension in between.
    in_flight: Mutex<HashSet<String>>,
    /// Epoch ms of the last successful *network* fetch per email (cache
    /// hits do not count).
    last_network_fetch: Mutex<HashMap<String, i64>>,
    fetch_done: Notify,
}

/// Releases the in-flight claim even when the fetch errors or the future is
/// dropped mid-way.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    email: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(self.email);
        self.inner.fetch_done.notify_waiters();
    }
}

impl RefreshCoordinator {
    pub fn new(
        source: &str,
        cache: FileCache,
        history: HistoryStore,
        fetcher: Arc<dyn QuotaFetcher>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source: source.to_string(),
                cache,
                history,
                fetcher,
                credentials,
                in_flight: Mutex::new(HashSet::new()),
                last_network_fetch: Mutex::new(HashMap::new()),
                fetch_done: Notify::new(),
            }),
        }
    }

    /// Refreshes one account, serving the disk cache when fresh and
    /// deduplicating against any in-flight fetch for the same email.
    pub async fn refresh_account(&self, email: &str, options: &RefreshOptions) -> RefreshResult {
        let email = normalize_email(email);
        loop {
            if self.try_claim(&email) {
                return self.fetch_with_claim(&email, options).await;
            }

            // Someone else is fetching this account. Wait for them, then
            // prefer their result via the cache.
            let wait_started_at = now_ms();
            if !self.wait_for_in_flight(&email).await {
                return RefreshResult::failed(format!(
                    "Timed out waiting for in-flight refresh of {}",
                    email
                ));
            }
            if let Some(result) = self.cache_after_wait(&email, options, wait_started_at) {
                return result;
            }
            // The finished fetch did not satisfy this caller (stale cache,
            // or a force request racing an older fetch): claim and fetch.
        }
    }

    /// Sequential batch refresh. Intentionally serialized to cap upstream
    /// load at one request at a time process-wide.
    pub async fn refresh_accounts(
        &self,
        emails: &[String],
        options: &RefreshOptions,
    ) -> HashMap<String, RefreshResult> {
        let mut results = HashMap::new();
        for email in emails {
            let email = normalize_email(email);
            let result = self.refresh_account(&email, options).await;
            results.insert(email, result);
        }
        results
    }

    /// Refreshes every account in the credential store that is neither
    /// invalid nor forbidden.
    pub async fn refresh_all(&self, options: &RefreshOptions) -> HashMap<String, RefreshResult> {
        let mut emails: Vec<String> = self
            .inner
            .credentials
            .all_credentials()
            .into_iter()
            .filter(|(_, info)| !info.is_invalid && !info.is_forbidden)
            .map(|(email, _)| email)
            .collect();
        emails.sort();
        self.refresh_accounts(&emails, options).await
    }

    /// Epoch ms of the last successful network fetch for an email, if any.
    pub fn last_network_fetch(&self, email: &str) -> Option<i64> {
        self.inner
            .last_network_fetch
            .lock()
            .expect("fetch-time lock poisoned")
            .get(&normalize_email(email))
            .copied()
    }

    fn try_claim(&self, email: &str) -> bool {
        let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock poisoned");
        if in_flight.contains(email) {
            false
        } else {
            in_flight.insert(email.to_string());
            true
        }
    }

    /// Waits until no fetch is in flight for `email`, bounded by
    /// [`IN_FLIGHT_WAIT_BUDGET`]. Returns false on timeout.
    async fn wait_for_in_flight(&self, email: &str) -> bool {
        let deadline = tokio::time::Instant::now() + IN_FLIGHT_WAIT_BUDGET;
        loop {
            // Register for the wakeup before re-checking, so a release
            // between the check and the await is not missed.
            let notified = self.inner.fetch_done.notified();
            tokio::pin!(notified);

            if !self
                .inner
                .in_flight
                .lock()
                .expect("in-flight lock poisoned")
                .contains(email)
            {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return false;
            };
            if tokio::time::timeout(remaining, &mut notified).await.is_err() {
                return false;
            }
        }
    }

    /// After waiting out another caller's fetch, decides whether the cache
    /// now satisfies this caller. A force-refresh caller is only satisfied
    /// by a network fetch that completed at-or-after its own wait start;
    /// otherwise it falls through and fetches itself.
    fn cache_after_wait(
        &self,
        email: &str,
        options: &RefreshOptions,
        wait_started_at: i64,
    ) -> Option<RefreshResult> {
        let record = self.inner.cache.read(&self.inner.source, email)?;
        if !FileCache::is_valid(&record, DEFAULT_TTL_MS) {
            return None;
        }
        if options.force_refresh {
            let last = self.last_network_fetch(email)?;
            if last < wait_started_at || record.updated_at < last {
                return None;
            }
        }
        let snapshot = self
            .inner
            .fetcher
            .snapshot_from_cached_payload(&record.payload, record.updated_at)?;
        Some(RefreshResult::cached(snapshot))
    }

    async fn fetch_with_claim(&self, email: &str, options: &RefreshOptions) -> RefreshResult {
        let _guard = InFlightGuard {
            inner: &self.inner,
            email,
        };

        if !options.force_refresh {
            if let Some(record) = self.inner.cache.read(&self.inner.source, email) {
                if FileCache::is_valid(&record, DEFAULT_TTL_MS) {
                    if let Some(snapshot) = self
                        .inner
                        .fetcher
                        .snapshot_from_cached_payload(&record.payload, record.updated_at)
                    {
                        tracing::debug!(
                            "Serving quota for {} from cache ({}ms old, reason: {})",
                            email,
                            FileCache::age_ms(&record),
                            options.reason
                        );
                        return RefreshResult::cached(snapshot);
                    }
                }
            }
        }

        tracing::debug!(
            "Fetching quota for {} (force: {}, reason: {})",
            email,
            options.force_refresh,
            options.reason
        );
        match self
            .inner
            .fetcher
            .fetch_quota(email, options.force_refresh)
            .await
        {
            Ok(snapshot) => {
                let fetched_at = now_ms();
                self.inner
                    .last_network_fetch
                    .lock()
                    .expect("fetch-time lock poisoned")
                    .insert(email.to_string(), fetched_at);

                let record = QuotaApiCacheRecord::new(
                    &self.inner.source,
                    email,
                    fetched_at,
                    snapshot.payload.clone(),
                );
                if let Err(e) = self.inner.cache.write(&record) {
                    tracing::warn!("Failed to write quota cache for {}: {:#}", email, e);
                }
                // Best-effort: a failed history write never fails the
                // refresh itself.
                self.inner.history.record(email, &snapshot);

                RefreshResult::fetched(snapshot)
            }
            Err(e) => {
                tracing::debug!("Quota fetch failed for {}: {:#}", email, e);
                RefreshResult::failed(format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
