//! Per-account quota history: group extraction, compaction, durable store.

pub mod compact;
pub mod groups;
pub mod store;

pub use compact::{display_minutes, resolve_point_action, PointAction, QuotaHistoryPoint};
pub use store::{
    normalize_range_days, HistoryModelInfo, HistoryStore, QuotaHistoryModelRecord,
    QuotaHistoryQuery, QuotaHistoryRecord, MAX_AGE_DAYS, MAX_POINTS,
};
