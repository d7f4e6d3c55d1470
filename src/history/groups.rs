//! Fixed table of tracked model groups.
//!
//! The upstream exposes many model ids that share a quota pool (high/low
//! reasoning variants, preview aliases). History is tracked per group, with
//! one representative sample per snapshot: the present candidate model —
//! restricted to the recommended allow-list — with the lowest remaining
//! percentage, ties broken by encounter order.

use crate::types::{ModelQuotaEntry, QuotaSnapshot};

/// Static definition of one tracked group.
#[derive(Debug, Clone, Copy)]
pub struct GroupDef {
    pub id: &'static str,
    pub label: &'static str,
    /// Display ordering in query results (lower first).
    pub rank: u8,
    pub candidates: &'static [&'static str],
}

pub const GROUPS: &[GroupDef] = &[
    GroupDef {
        id: "gemini-3-pro",
        label: "Gemini 3 Pro",
        rank: 0,
        candidates: &["gemini-3-pro-high", "gemini-3-pro-low", "gemini-3-pro-preview"],
    },
    GroupDef {
        id: "gemini-3-flash",
        label: "Gemini 3 Flash",
        rank: 1,
        candidates: &["gemini-3-flash", "gemini-3-flash-preview"],
    },
    GroupDef {
        id: "claude-sonnet",
        label: "Claude Sonnet",
        rank: 2,
        candidates: &[
            "claude-sonnet-4-5",
            "claude-sonnet-4-5-thinking",
            "claude-sonnet-4-6",
        ],
    },
    GroupDef {
        id: "gemini-3-pro-image",
        label: "Gemini 3 Pro Image",
        rank: 3,
        candidates: &["gemini-3-pro-image"],
    },
];

/// Models the upstream currently marks as recommended. Candidates outside
/// this list are ignored when picking a group's representative sample.
const RECOMMENDED_MODELS: &[&str] = &[
    "gemini-3-pro-high",
    "gemini-3-pro-low",
    "gemini-3-flash",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
    "gemini-3-pro-image",
];

pub fn group_def(group_id: &str) -> Option<&'static GroupDef> {
    GROUPS.iter().find(|g| g.id == group_id)
}

/// Display rank for sorting available groups; unknown ids sort last.
pub fn group_rank(group_id: &str) -> u8 {
    group_def(group_id).map(|g| g.rank).unwrap_or(u8::MAX)
}

/// One representative sample extracted from a snapshot.
#[derive(Debug, Clone)]
pub struct GroupSample<'a> {
    pub group: &'static GroupDef,
    pub entry: &'a ModelQuotaEntry,
}

/// Scans a snapshot's model list and selects each group's representative.
/// Groups with no matching recommended candidate are skipped.
pub fn extract_group_samples(snapshot: &QuotaSnapshot) -> Vec<GroupSample<'_>> {
    let mut samples = Vec::new();
    for group in GROUPS {
        let mut best: Option<&ModelQuotaEntry> = None;
        for entry in &snapshot.models {
            if !group.candidates.contains(&entry.model_id.as_str()) {
                continue;
            }
            if !RECOMMENDED_MODELS.contains(&entry.model_id.as_str()) {
                continue;
            }
            // Strict less-than keeps the first-encountered entry on ties.
            match best {
                Some(b) if entry.remaining_percentage >= b.remaining_percentage => {}
                _ => best = Some(entry),
            }
        }
        if let Some(entry) = best {
            samples.push(GroupSample { group, entry });
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(model_id: &str, pct: f64) -> ModelQuotaEntry {
        ModelQuotaEntry {
            model_id: model_id.to_string(),
            label: model_id.to_string(),
            remaining_percentage: pct,
            reset_time: None,
            exhausted: pct <= 0.0,
        }
    }

    fn snapshot(models: Vec<ModelQuotaEntry>) -> QuotaSnapshot {
        QuotaSnapshot {
            timestamp: 0,
            connected: true,
            error: None,
            models,
            grouped: None,
            payload: json!({}),
        }
    }

    #[test]
    fn test_lowest_percentage_wins_within_group() {
        let snap = snapshot(vec![
            entry("gemini-3-pro-high", 80.0),
            entry("gemini-3-pro-low", 55.0),
        ]);
        let samples = extract_group_samples(&snap);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].group.id, "gemini-3-pro");
        assert_eq!(samples[0].entry.model_id, "gemini-3-pro-low");
    }

    #[test]
    fn test_tie_keeps_encounter_order() {
        let snap = snapshot(vec![
            entry("gemini-3-pro-low", 70.0),
            entry("gemini-3-pro-high", 70.0),
        ]);
        let samples = extract_group_samples(&snap);
        assert_eq!(samples[0].entry.model_id, "gemini-3-pro-low");
    }

    #[test]
    fn test_non_recommended_candidate_is_ignored() {
        // gemini-3-pro-preview is a known candidate but not recommended.
        let snap = snapshot(vec![entry("gemini-3-pro-preview", 10.0)]);
        assert!(extract_group_samples(&snap).is_empty());
    }

    #[test]
    fn test_groups_without_candidates_are_skipped() {
        let snap = snapshot(vec![
            entry("gemini-3-flash", 90.0),
            entry("some-unknown-model", 5.0),
        ]);
        let samples = extract_group_samples(&snap);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].group.id, "gemini-3-flash");
    }

    #[test]
    fn test_group_rank_unknown_sorts_last() {
        assert_eq!(group_rank("gemini-3-pro"), 0);
        assert_eq!(group_rank("nope"), u8::MAX);
    }
}
