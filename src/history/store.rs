//! Durable per-account quota history with compaction and retention.

use super::compact::{resolve_point_action, PointAction, QuotaHistoryPoint};
use super::groups::{extract_group_samples, group_rank};
use crate::paths::{write_atomic, QuotaPaths};
use crate::types::{normalize_email, QuotaSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::sync::OnceLock;

/// Hard cap on stored points per model group.
pub const MAX_POINTS: usize = 5000;
/// Points older than this are dropped before the count cap is applied.
pub const MAX_AGE_DAYS: i64 = 30;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Compacted history for one tracked model group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaHistoryModelRecord {
    pub model_id: String,
    pub label: String,
    pub points: Vec<QuotaHistoryPoint>,
    #[serde(default)]
    pub has_countdown_drop_at_100: bool,
}

/// Durable history record for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaHistoryRecord {
    pub email: String,
    /// Epoch milliseconds of the last recorded sample.
    pub updated_at: i64,
    pub models: BTreeMap<String, QuotaHistoryModelRecord>,
}

/// Group listing entry in a query result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryModelInfo {
    pub id: String,
    pub label: String,
}

/// Result of a history query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaHistoryQuery {
    pub email: String,
    pub range_days: u32,
    /// The group actually selected (requested id if available, otherwise
    /// the first available group by display rank).
    pub model_id: String,
    pub models: Vec<HistoryModelInfo>,
    pub points: Vec<QuotaHistoryPoint>,
}

/// File-backed store of [`QuotaHistoryRecord`]s.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    paths: QuotaPaths,
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"))
}

/// Normalizes a requested range to the supported buckets {1, 7, 30}.
/// Non-finite and non-positive values fall back to 7.
pub fn normalize_range_days(range_days: f64) -> u32 {
    if !range_days.is_finite() || range_days <= 0.0 {
        return 7;
    }
    if range_days <= 1.0 {
        1
    } else if range_days <= 7.0 {
        7
    } else {
        30
    }
}

impl HistoryStore {
    pub fn new(paths: QuotaPaths) -> Self {
        Self { paths }
    }

    /// Records one snapshot into the account's history. Returns whether a
    /// record was persisted. No-ops (false) on disconnected snapshots,
    /// syntactically invalid emails, and snapshots with no tracked group;
    /// persistence failures are logged and also return false.
    pub fn record(&self, email: &str, snapshot: &QuotaSnapshot) -> bool {
        if !snapshot.connected {
            return false;
        }
        let email = normalize_email(email);
        if !email_pattern().is_match(&email) {
            return false;
        }
        let samples = extract_group_samples(snapshot);
        if samples.is_empty() {
            return false;
        }

        let mut record = self.load(&email).unwrap_or_else(|| QuotaHistoryRecord {
            email: email.clone(),
            updated_at: snapshot.timestamp,
            models: BTreeMap::new(),
        });

        for sample in samples {
            let model = record
                .models
                .entry(sample.group.id.to_string())
                .or_insert_with(|| QuotaHistoryModelRecord {
                    model_id: sample.group.id.to_string(),
                    label: sample.group.label.to_string(),
                    points: Vec::new(),
                    has_countdown_drop_at_100: false,
                });

            let next = QuotaHistoryPoint {
                timestamp: snapshot.timestamp,
                remaining_percentage: sample.entry.remaining_percentage,
                reset_time: sample.entry.reset_time.clone(),
                countdown_seconds: countdown_seconds(
                    sample.entry.reset_time.as_deref(),
                    snapshot.timestamp,
                ),
                is_start: false,
                is_reset: false,
            };
            apply_point(model, next);
            trim_points(&mut model.points, snapshot.timestamp);
        }
        record.updated_at = snapshot.timestamp;

        let path = self.paths.history_file(&email);
        let content = match serde_json::to_string(&record) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to serialize quota history for {}: {}", email, e);
                return false;
            }
        };
        if let Err(e) = write_atomic(&path, &content) {
            tracing::warn!("Failed to persist quota history for {}: {:#}", email, e);
            return false;
        }
        true
    }

    /// Queries history for one account. Never errors; an absent or corrupt
    /// record yields an empty result.
    pub fn query(&self, email: &str, range_days: f64, model_id: Option<&str>) -> QuotaHistoryQuery {
        self.query_at(email, range_days, model_id, crate::types::now_ms())
    }

    pub fn query_at(
        &self,
        email: &str,
        range_days: f64,
        model_id: Option<&str>,
        now_ms: i64,
    ) -> QuotaHistoryQuery {
        let email = normalize_email(email);
        let range = normalize_range_days(range_days);
        let record = self.load(&email);

        let mut models: Vec<HistoryModelInfo> = record
            .as_ref()
            .map(|r| {
                r.models
                    .values()
                    .map(|m| HistoryModelInfo {
                        id: m.model_id.clone(),
                        label: m.label.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        models.sort_by(|a, b| {
            group_rank(&a.id)
                .cmp(&group_rank(&b.id))
                .then_with(|| a.label.cmp(&b.label))
        });

        let selected = model_id
            .filter(|id| models.iter().any(|m| m.id == *id))
            .map(|id| id.to_string())
            .or_else(|| models.first().map(|m| m.id.clone()))
            .unwrap_or_default();

        let cutoff = now_ms - i64::from(range) * DAY_MS;
        let points = record
            .as_ref()
            .and_then(|r| r.models.get(&selected))
            .map(|m| {
                m.points
                    .iter()
                    .filter(|p| p.timestamp >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        QuotaHistoryQuery {
            email,
            range_days: range,
            model_id: selected,
            models,
            points,
        }
    }

    /// Deletes one account's history file. Never errors.
    pub fn clear(&self, email: &str) -> bool {
        let path = self.paths.history_file(email);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Failed to clear quota history {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Deletes all history files. Never errors.
    pub fn clear_all(&self) -> bool {
        let dir = self.paths.history_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => {
                tracing::warn!("Failed to list quota history {}: {}", dir.display(), e);
                return false;
            }
        };
        let mut ok = true;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
                ok = false;
            }
        }
        ok
    }

    fn load(&self, email: &str) -> Option<QuotaHistoryRecord> {
        let path = self.paths.history_file(email);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Discarding unparsable history {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Seconds until the reported reset time, measured from the sample's own
/// timestamp. `None` when the reset time is absent or unparsable.
fn countdown_seconds(reset_time: Option<&str>, sample_ms: i64) -> Option<i64> {
    let reset = chrono::DateTime::parse_from_rfc3339(reset_time?).ok()?;
    Some((reset.timestamp_millis() - sample_ms) / 1000)
}

/// Runs the admission decision and mutates the model record accordingly.
fn apply_point(model: &mut QuotaHistoryModelRecord, next: QuotaHistoryPoint) {
    let (action, latch) =
        resolve_point_action(model.points.last(), &next, model.has_countdown_drop_at_100);
    model.has_countdown_drop_at_100 = latch;
    match action {
        PointAction::Add { is_start, is_reset } => {
            model.points.push(QuotaHistoryPoint {
                is_start,
                is_reset,
                ..next
            });
        }
        PointAction::Overwrite => {
            // Keep event marks from the replaced point; the fresh sample
            // only refreshes timestamp and countdown.
            let (is_start, is_reset) = model
                .points
                .pop()
                .map(|p| (p.is_start, p.is_reset))
                .unwrap_or((false, false));
            model.points.push(QuotaHistoryPoint {
                is_start,
                is_reset,
                ..next
            });
        }
        PointAction::Skip => {}
    }
}

/// Age-trims first, then applies the count cap, always dropping from the
/// oldest end.
fn trim_points(points: &mut Vec<QuotaHistoryPoint>, now_ms: i64) {
    let cutoff = now_ms - MAX_AGE_DAYS * DAY_MS;
    points.retain(|p| p.timestamp >= cutoff);
    if points.len() > MAX_POINTS {
        let excess = points.len() - MAX_POINTS;
        points.drain(..excess);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
