//! Point-admission compaction for quota history.
//!
//! The upstream API pins a model's percentage at 100 for a grace window
//! while a reset countdown ticks down. Naive sampling would store one point
//! per poll; this algorithm keeps only inflection points (percentage
//! changes, plateau starts, resets, the rare anomalous countdown collapse)
//! and timestamp-refreshes the rest by overwriting the latest point.

use serde::{Deserialize, Serialize};

/// One stored history point for a model group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaHistoryPoint {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub remaining_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_seconds: Option<i64>,
    /// Marks the first point of a drop below 100%, or the anomalous
    /// countdown collapse while pinned at 100%.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_start: bool,
    /// Marks usage being restored (percentage up, or a new countdown cycle).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_reset: bool,
}

impl QuotaHistoryPoint {
    pub fn new(timestamp: i64, remaining_percentage: f64) -> Self {
        Self {
            timestamp,
            remaining_percentage,
            reset_time: None,
            countdown_seconds: None,
            is_start: false,
            is_reset: false,
        }
    }
}

/// What to do with a candidate point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointAction {
    /// Append as a new point, with the given event marks.
    Add { is_start: bool, is_reset: bool },
    /// Drop the candidate; it carries no new information.
    Skip,
    /// Replace the latest stored point in place (timestamp refresh),
    /// carrying forward any event marks the replaced point had.
    Overwrite,
}

impl PointAction {
    pub const fn add() -> Self {
        PointAction::Add {
            is_start: false,
            is_reset: false,
        }
    }

    pub const fn start() -> Self {
        PointAction::Add {
            is_start: true,
            is_reset: false,
        }
    }

    pub const fn reset() -> Self {
        PointAction::Add {
            is_start: false,
            is_reset: true,
        }
    }
}

/// Countdown minutes as rendered by the UI: 0 once the countdown has hit
/// zero, otherwise seconds rounded up to whole minutes.
pub fn display_minutes(countdown_seconds: Option<i64>) -> Option<i64> {
    let secs = countdown_seconds?;
    if secs <= 0 {
        Some(0)
    } else {
        Some((secs + 59) / 60)
    }
}

/// Decides how to admit a candidate point, given the latest stored point and
/// the current `has_countdown_drop_at_100` latch. Returns the action and the
/// new latch value.
///
/// The latch is true only while the percentage is pinned at 100 and one
/// large countdown drop has already been recorded as a start event; it
/// clears the moment the percentage moves below 100.
pub fn resolve_point_action(
    last: Option<&QuotaHistoryPoint>,
    next: &QuotaHistoryPoint,
    latch: bool,
) -> (PointAction, bool) {
    let last = match last {
        Some(p) => p,
        None => {
            let latch = if next.remaining_percentage < 100.0 { false } else { latch };
            return (PointAction::add(), latch);
        }
    };

    if next.remaining_percentage < 100.0 {
        // Below the plateau: the latch never survives here.
        if last.remaining_percentage >= 100.0 {
            return (PointAction::start(), false);
        }
        if next.remaining_percentage == last.remaining_percentage {
            return (PointAction::Skip, false);
        }
        if next.remaining_percentage > last.remaining_percentage {
            return (PointAction::reset(), false);
        }
        return (PointAction::add(), false);
    }

    if last.remaining_percentage < 100.0 {
        // Back up to 100: a reset, and a fresh plateau.
        return (PointAction::reset(), false);
    }

    // Both pinned at 100: compare displayed countdown minutes.
    let last_minutes = display_minutes(last.countdown_seconds);
    let next_minutes = display_minutes(next.countdown_seconds);
    let (last_minutes, next_minutes) = match (last_minutes, next_minutes) {
        (Some(a), Some(b)) => (a, b),
        _ => return (PointAction::Overwrite, latch),
    };

    let delta = next_minutes - last_minutes;
    if delta > 1 {
        // Countdown jumped up: a new cycle began.
        return (PointAction::reset(), false);
    }
    if delta < -2 {
        if latch {
            // Still the same observed drop.
            return (PointAction::Overwrite, true);
        }
        // First time the countdown is seen collapsing while pinned at 100%,
        // a known upstream artifact worth flagging.
        return (PointAction::start(), true);
    }
    // Ordinary one-minute tick.
    (PointAction::Overwrite, latch)
}

#[cfg(test)]
#[path = "tests/compact_tests.rs"]
mod tests;
