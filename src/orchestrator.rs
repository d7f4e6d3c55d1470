//! Multi-account orchestration: account state, batch refresh, polling loop.
//!
//! Owns `AccountState` and `AccountQuotaCache` exclusively; consumers get
//! cloned read-only views and a "something changed" broadcast. Fetch errors
//! are classified once and folded into durable state flags so automatic
//! cycles stop hammering known-bad accounts.

use crate::collaborators::{AccountLister, CredentialStore};
use crate::coordinator::RefreshCoordinator;
use crate::error::{classify_fetch_error, FetchErrorKind};
use crate::history::{HistoryStore, QuotaHistoryQuery};
use crate::scheduler::RepeatingTask;
use crate::types::{
    normalize_email, now_ms, AccountQuotaCache, AccountState, RefreshOptions, RefreshResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// Minimum spacing between manual refreshes.
pub const MANUAL_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

const NO_CREDENTIAL_REASON: &str = "No credential available";

/// Options for one orchestrated refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshCycleOptions {
    pub force_refresh: bool,
    pub reason: String,
    /// When set, accounts flagged invalid or forbidden are retried instead
    /// of skipped (an explicit allowed retry).
    pub include_flagged: bool,
}

impl RefreshCycleOptions {
    pub fn auto() -> Self {
        Self {
            force_refresh: false,
            reason: "auto".to_string(),
            include_flagged: false,
        }
    }

    pub fn manual() -> Self {
        Self {
            force_refresh: true,
            reason: "manual".to_string(),
            include_flagged: false,
        }
    }

    pub fn startup() -> Self {
        Self {
            force_refresh: false,
            reason: "startup".to_string(),
            include_flagged: false,
        }
    }
}

/// Orchestrates refreshes across all known accounts.
#[derive(Clone)]
pub struct AccountOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    coordinator: RefreshCoordinator,
    history: HistoryStore,
    credentials: Arc<dyn CredentialStore>,
    lister: Arc<dyn AccountLister>,
    accounts: Mutex<HashMap<String, AccountState>>,
    quota_cache: Mutex<HashMap<String, AccountQuotaCache>>,
    /// One refresh cycle at a time; concurrent callers wait for the
    /// in-flight cycle instead of starting another.
    cycle_in_flight: Mutex<bool>,
    cycle_done: Notify,
    changed_tx: broadcast::Sender<()>,
    last_manual_refresh: Mutex<Option<tokio::time::Instant>>,
    auto_task: Mutex<Option<RepeatingTask>>,
}

struct CycleGuard<'a> {
    inner: &'a OrchestratorInner,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self
            .inner
            .cycle_in_flight
            .lock()
            .expect("cycle lock poisoned") = false;
        self.inner.cycle_done.notify_waiters();
    }
}

impl AccountOrchestrator {
    pub fn new(
        coordinator: RefreshCoordinator,
        history: HistoryStore,
        credentials: Arc<dyn CredentialStore>,
        lister: Arc<dyn AccountLister>,
    ) -> Self {
        let (changed_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(OrchestratorInner {
                coordinator,
                history,
                credentials,
                lister,
                accounts: Mutex::new(HashMap::new()),
                quota_cache: Mutex::new(HashMap::new()),
                cycle_in_flight: Mutex::new(false),
                cycle_done: Notify::new(),
                changed_tx,
                last_manual_refresh: Mutex::new(None),
                auto_task: Mutex::new(None),
            }),
        }
    }

    /// Fires whenever account state or the quota cache mutates. No payload:
    /// consumers re-read the views.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.inner.changed_tx.subscribe()
    }

    /// Read-only view of all account states, sorted by email.
    pub fn account_states(&self) -> Vec<AccountState> {
        let mut states: Vec<AccountState> = self
            .inner
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| a.email.cmp(&b.email));
        states
    }

    /// Read-only view of one account's quota cache.
    pub fn quota_cache(&self, email: &str) -> Option<AccountQuotaCache> {
        self.inner
            .quota_cache
            .lock()
            .expect("cache lock poisoned")
            .get(&normalize_email(email))
            .cloned()
    }

    /// Runs one refresh cycle. Concurrent callers share the in-flight
    /// cycle: they wait for it to finish and return without starting a
    /// second one.
    pub async fn refresh(&self, options: &RefreshCycleOptions) {
        // Register for the wakeup before inspecting the flag, so a cycle
        // finishing in between is not missed. The guard must not be held
        // across the await, so the claim happens in its own block.
        let notified = self.inner.cycle_done.notified();
        tokio::pin!(notified);
        let wait = {
            let mut in_flight = self
                .inner
                .cycle_in_flight
                .lock()
                .expect("cycle lock poisoned");
            if *in_flight {
                true
            } else {
                *in_flight = true;
                false
            }
        };
        if wait {
            notified.await;
            return;
        }
        let _guard = CycleGuard { inner: &self.inner };
        self.run_cycle(options).await;
    }

    /// Forced refresh with a cooldown. Returns false (cooldown notice)
    /// when invoked again within [`MANUAL_REFRESH_COOLDOWN`].
    pub async fn manual_refresh(&self) -> bool {
        {
            let mut last = self
                .inner
                .last_manual_refresh
                .lock()
                .expect("manual-refresh lock poisoned");
            let now = tokio::time::Instant::now();
            if let Some(at) = *last {
                if now.duration_since(at) < MANUAL_REFRESH_COOLDOWN {
                    tracing::debug!("Manual refresh ignored: cooldown active");
                    return false;
                }
            }
            *last = Some(now);
        }
        self.refresh(&RefreshCycleOptions::manual()).await;
        true
    }

    /// Startup refresh: waits briefly for the realtime account channel so
    /// the richer source is preferred, then refreshes either way.
    pub async fn refresh_on_startup(&self, wait: Duration) {
        let connected = self.inner.lister.wait_connected(wait).await;
        if !connected {
            tracing::debug!("Realtime account channel not ready; refreshing anyway");
        }
        self.refresh(&RefreshCycleOptions::startup()).await;
    }

    /// Single-account forced refresh with an optimistic loading entry
    /// published immediately.
    pub async fn load_account_quota(&self, email: &str) {
        let email = normalize_email(email);
        {
            let mut cache = self.inner.quota_cache.lock().expect("cache lock poisoned");
            let entry = cache.entry(email.clone()).or_default();
            entry.loading = true;
            entry.error = None;
        }
        self.notify_changed();

        let result = self
            .inner
            .coordinator
            .refresh_account(&email, &RefreshOptions::forced("load-account"))
            .await;
        self.apply_result(&email, result);
        self.notify_changed();
    }

    /// Starts the self-rescheduling auto-refresh loop.
    pub fn start_auto_refresh(&self, base_interval: Duration) {
        let orchestrator = self.clone();
        let task = RepeatingTask::spawn(base_interval, move || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator.refresh(&RefreshCycleOptions::auto()).await;
            }
        });
        let previous = self
            .inner
            .auto_task
            .lock()
            .expect("auto-task lock poisoned")
            .replace(task);
        if let Some(previous) = previous {
            // Replacing a running loop: let the old one wind down.
            tokio::spawn(async move { previous.stop().await });
        }
    }

    /// Stops the auto-refresh loop, cancelling the pending timer.
    pub async fn stop_auto_refresh(&self) {
        let task = self
            .inner
            .auto_task
            .lock()
            .expect("auto-task lock poisoned")
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Queries compacted history for an account.
    pub fn query_history(
        &self,
        email: &str,
        range_days: f64,
        model_id: Option<&str>,
    ) -> QuotaHistoryQuery {
        self.inner.history.query(email, range_days, model_id)
    }

    /// Clears stored history for one account.
    pub fn clear_history(&self, email: &str) -> bool {
        let ok = self.inner.history.clear(email);
        self.notify_changed();
        ok
    }

    /// Clears stored history for all accounts.
    pub fn clear_all_history(&self) -> bool {
        let ok = self.inner.history.clear_all();
        self.notify_changed();
        ok
    }

    async fn run_cycle(&self, options: &RefreshCycleOptions) {
        self.sync_accounts();

        let eligible = self.select_eligible(options);
        self.notify_changed();
        if eligible.is_empty() {
            return;
        }

        let refresh_options = RefreshOptions {
            force_refresh: options.force_refresh,
            reason: options.reason.clone(),
        };
        let results = self
            .inner
            .coordinator
            .refresh_accounts(&eligible, &refresh_options)
            .await;
        for (email, result) in results {
            self.apply_result(&email, result);
        }
        self.notify_changed();
    }

    /// Re-syncs account state from the lister and the credential store.
    /// Accounts that disappeared are dropped along with their caches;
    /// durable invalid/forbidden flags on surviving accounts are preserved.
    fn sync_accounts(&self) {
        let listed = self.inner.lister.list_accounts();
        let credentials = self.inner.credentials.all_credentials();

        let mut accounts = self.inner.accounts.lock().expect("accounts lock poisoned");
        let mut cache = self.inner.quota_cache.lock().expect("cache lock poisoned");

        let mut seen: Vec<String> = Vec::with_capacity(listed.len());
        for info in listed {
            let email = normalize_email(&info.email);
            seen.push(email.clone());
            let state = accounts
                .entry(email.clone())
                .or_insert_with(|| AccountState::new(&email));
            state.external_id = info.external_id;
            state.is_current = info.is_current;
            state.device_bound = info.device_bound;
            state.tier = info.tier;

            match credentials.get(&email) {
                Some(info) => {
                    state.has_credential = true;
                    state.credential_expires_at = info.expires_at;
                    if info.is_invalid && !state.is_invalid {
                        state.is_invalid = true;
                        state.invalid_reason = Some(FetchErrorKind::Auth.user_reason().to_string());
                    }
                    if info.is_forbidden && !state.is_forbidden {
                        state.is_forbidden = true;
                        state.forbidden_reason =
                            Some(FetchErrorKind::Forbidden.user_reason().to_string());
                    }
                }
                None => {
                    state.has_credential = false;
                    state.credential_expires_at = None;
                }
            }
        }
        accounts.retain(|email, _| seen.contains(email));
        cache.retain(|email, _| seen.contains(email));
    }

    /// Partitions accounts into eligible emails and skip-marked caches.
    fn select_eligible(&self, options: &RefreshCycleOptions) -> Vec<String> {
        let accounts = self.inner.accounts.lock().expect("accounts lock poisoned");
        let mut cache = self.inner.quota_cache.lock().expect("cache lock poisoned");

        let mut eligible = Vec::new();
        for (email, state) in accounts.iter() {
            let skip_reason = if !state.has_credential {
                Some(NO_CREDENTIAL_REASON.to_string())
            } else if state.is_invalid && !options.include_flagged {
                state
                    .invalid_reason
                    .clone()
                    .or_else(|| Some(FetchErrorKind::Auth.user_reason().to_string()))
            } else if state.is_forbidden && !options.include_flagged {
                state
                    .forbidden_reason
                    .clone()
                    .or_else(|| Some(FetchErrorKind::Forbidden.user_reason().to_string()))
            } else {
                None
            };

            match skip_reason {
                Some(reason) => {
                    let entry = cache.entry(email.clone()).or_default();
                    entry.loading = false;
                    entry.error = Some(reason);
                }
                None => eligible.push(email.clone()),
            }
        }
        eligible.sort();
        eligible
    }

    /// Folds one refresh result into the quota cache and the durable
    /// account flags.
    fn apply_result(&self, email: &str, result: RefreshResult) {
        let mut accounts = self.inner.accounts.lock().expect("accounts lock poisoned");
        let mut cache = self.inner.quota_cache.lock().expect("cache lock poisoned");
        let entry = cache.entry(email.to_string()).or_default();
        entry.loading = false;
        entry.fetched_at = Some(now_ms());

        if result.success {
            entry.snapshot = result.snapshot;
            entry.error = None;
            if let Some(state) = accounts.get_mut(email) {
                if state.is_forbidden {
                    state.is_forbidden = false;
                    state.forbidden_reason = None;
                    self.inner.credentials.clear_forbidden(email);
                }
                state.is_invalid = false;
                state.invalid_reason = None;
            }
            return;
        }

        let raw_error = result.error.unwrap_or_else(|| "Unknown error".to_string());
        let kind = classify_fetch_error(&raw_error);
        match kind {
            FetchErrorKind::Forbidden => {
                let reason = kind.user_reason().to_string();
                entry.error = Some(reason.clone());
                if let Some(state) = accounts.get_mut(email) {
                    state.is_forbidden = true;
                    state.forbidden_reason = Some(reason);
                }
                self.inner.credentials.mark_forbidden(email, true);
                tracing::warn!("Account {} marked forbidden: {}", email, raw_error);
            }
            FetchErrorKind::Auth => {
                let reason = kind.user_reason().to_string();
                entry.error = Some(reason.clone());
                if let Some(state) = accounts.get_mut(email) {
                    state.is_invalid = true;
                    state.invalid_reason = Some(reason);
                }
                tracing::warn!("Account {} marked invalid: {}", email, raw_error);
            }
            FetchErrorKind::Network => {
                entry.error = Some(raw_error);
            }
        }
    }

    fn notify_changed(&self) {
        // Nobody listening is fine.
        let _ = self.inner.changed_tx.send(());
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
