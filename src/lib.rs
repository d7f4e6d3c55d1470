//! Quota refresh-and-history engine for multi-account usage monitoring.
//!
//! Watches per-model usage allowances across several accounts without
//! hammering the upstream API:
//!
//! - [`file_cache::FileCache`] — durable, TTL-gated, cross-process cache of
//!   the latest raw quota response per account.
//! - [`history::HistoryStore`] — compacted per-account time series of quota
//!   percentages per tracked model group, with retention limits.
//! - [`coordinator::RefreshCoordinator`] — per-account fetch deduplication
//!   and the cache-or-fetch decision.
//! - [`orchestrator::AccountOrchestrator`] — multi-account state machine
//!   and jittered self-rescheduling polling loop.
//!
//! Rendering, OAuth and account discovery live outside this crate and are
//! reached through the traits in [`collaborators`].

pub mod collaborators;
pub mod coordinator;
pub mod error;
pub mod file_cache;
pub mod history;
pub mod orchestrator;
pub mod paths;
pub mod scheduler;
pub mod types;

pub use collaborators::{AccountInfo, AccountLister, CredentialInfo, CredentialStore, QuotaFetcher};
pub use coordinator::RefreshCoordinator;
pub use error::{classify_fetch_error, FetchErrorKind};
pub use file_cache::{FileCache, QuotaApiCacheRecord, DEFAULT_TTL_MS};
pub use history::{HistoryStore, QuotaHistoryPoint, QuotaHistoryQuery, QuotaHistoryRecord};
pub use orchestrator::{AccountOrchestrator, RefreshCycleOptions};
pub use paths::QuotaPaths;
pub use scheduler::RepeatingTask;
pub use types::{
    AccountQuotaCache, AccountState, ModelQuotaEntry, QuotaSnapshot, RefreshOptions, RefreshResult,
};
