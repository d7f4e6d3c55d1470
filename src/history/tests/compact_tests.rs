use super::*;
use proptest::prelude::*;

fn pct(ts: i64, percentage: f64) -> QuotaHistoryPoint {
    QuotaHistoryPoint::new(ts, percentage)
}

fn pinned(ts: i64, countdown_seconds: i64) -> QuotaHistoryPoint {
    QuotaHistoryPoint {
        countdown_seconds: Some(countdown_seconds),
        ..QuotaHistoryPoint::new(ts, 100.0)
    }
}

#[test]
fn test_first_point_is_added() {
    let (action, latch) = resolve_point_action(None, &pct(1, 73.0), false);
    assert_eq!(action, PointAction::add());
    assert!(!latch);
}

#[test]
fn test_plateau_start_marks_first_drop() {
    // 100 -> 100 is a skip/overwrite territory; 100 -> 99 starts the drop.
    let last = pct(1, 100.0);
    let (action, latch) = resolve_point_action(Some(&last), &pct(2, 99.0), false);
    assert_eq!(action, PointAction::start());
    assert!(!latch);
}

#[test]
fn test_equal_percentage_below_100_is_skipped() {
    let last = pct(1, 85.0);
    let (action, _) = resolve_point_action(Some(&last), &pct(2, 85.0), false);
    assert_eq!(action, PointAction::Skip);
}

#[test]
fn test_percentage_increase_below_100_is_reset() {
    let last = pct(1, 80.0);
    let (action, _) = resolve_point_action(Some(&last), &pct(2, 95.0), false);
    assert_eq!(action, PointAction::reset());
}

#[test]
fn test_normal_decay_is_plain_add() {
    let last = pct(1, 80.0);
    let (action, _) = resolve_point_action(Some(&last), &pct(2, 62.0), false);
    assert_eq!(action, PointAction::add());
}

#[test]
fn test_return_to_100_is_reset_and_clears_latch() {
    let last = pct(1, 40.0);
    let (action, latch) = resolve_point_action(Some(&last), &pct(2, 100.0), true);
    assert_eq!(action, PointAction::reset());
    assert!(!latch);
}

#[test]
fn test_drop_below_100_clears_latch() {
    let last = pinned(1, 600);
    let (action, latch) = resolve_point_action(Some(&last), &pct(2, 99.0), true);
    assert_eq!(action, PointAction::start());
    assert!(!latch);
}

#[test]
fn test_missing_countdown_at_100_overwrites() {
    let last = pct(1, 100.0); // no countdown on either side
    let (action, latch) = resolve_point_action(Some(&last), &pct(2, 100.0), true);
    assert_eq!(action, PointAction::Overwrite);
    assert!(latch, "latch untouched when minutes are unknown");
}

#[test]
fn test_countdown_tick_overwrites() {
    // 50 minutes -> 49 minutes: delta -1, an ordinary tick.
    let last = pinned(1, 50 * 60);
    let (action, latch) = resolve_point_action(Some(&last), &pinned(2, 49 * 60), false);
    assert_eq!(action, PointAction::Overwrite);
    assert!(!latch);
}

#[test]
fn test_countdown_jump_up_is_reset() {
    let last = pinned(1, 10 * 60);
    let (action, latch) = resolve_point_action(Some(&last), &pinned(2, 50 * 60), true);
    assert_eq!(action, PointAction::reset());
    assert!(!latch);
}

#[test]
fn test_countdown_collapse_sets_latch_once() {
    // Known artifact sequence: minutes 50 -> 49 -> 10 -> 9.
    let p50 = pinned(1, 50 * 60);
    let p49 = pinned(2, 49 * 60);
    let p10 = pinned(3, 10 * 60);
    let p9 = pinned(4, 9 * 60);

    let (a1, l1) = resolve_point_action(Some(&p50), &p49, false);
    assert_eq!(a1, PointAction::Overwrite);
    assert!(!l1);

    // delta -39: large collapse, first occurrence -> start + latch.
    let (a2, l2) = resolve_point_action(Some(&p49), &p10, l1);
    assert_eq!(a2, PointAction::start());
    assert!(l2);

    // Another tick while latched: same observed drop, just refresh.
    let (a3, l3) = resolve_point_action(Some(&p10), &p9, l2);
    assert_eq!(a3, PointAction::Overwrite);
    assert!(l3);
}

#[test]
fn test_second_collapse_while_latched_overwrites() {
    let p30 = pinned(1, 30 * 60);
    let p5 = pinned(2, 5 * 60);
    let (action, latch) = resolve_point_action(Some(&p30), &p5, true);
    assert_eq!(action, PointAction::Overwrite);
    assert!(latch);
}

#[test]
fn test_display_minutes_rounds_up() {
    assert_eq!(display_minutes(None), None);
    assert_eq!(display_minutes(Some(-5)), Some(0));
    assert_eq!(display_minutes(Some(0)), Some(0));
    assert_eq!(display_minutes(Some(1)), Some(1));
    assert_eq!(display_minutes(Some(60)), Some(1));
    assert_eq!(display_minutes(Some(61)), Some(2));
    assert_eq!(display_minutes(Some(3000)), Some(50));
}

proptest! {
    /// Whatever the sample stream looks like, applying the admission
    /// decisions keeps timestamps non-decreasing and a skip never loses an
    /// already-stored point.
    #[test]
    fn prop_applied_sequence_keeps_time_order(
        samples in proptest::collection::vec((0u8..=100u8, proptest::option::of(0i64..7200)), 1..60)
    ) {
        let mut points: Vec<QuotaHistoryPoint> = Vec::new();
        let mut latch = false;
        for (i, (percentage, countdown)) in samples.iter().enumerate() {
            let next = QuotaHistoryPoint {
                countdown_seconds: *countdown,
                ..QuotaHistoryPoint::new(i as i64 * 1000, f64::from(*percentage))
            };
            let (action, new_latch) = resolve_point_action(points.last(), &next, latch);
            latch = new_latch;
            match action {
                PointAction::Add { is_start, is_reset } => {
                    points.push(QuotaHistoryPoint { is_start, is_reset, ..next });
                }
                PointAction::Overwrite => {
                    let prev = points.pop();
                    let (is_start, is_reset) = prev
                        .map(|p| (p.is_start, p.is_reset))
                        .unwrap_or((false, false));
                    points.push(QuotaHistoryPoint { is_start, is_reset, ..next });
                }
                PointAction::Skip => {}
            }
            prop_assert!(!points.is_empty());
            prop_assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
        // Latch only holds while pinned at 100.
        if latch {
            prop_assert_eq!(points.last().unwrap().remaining_percentage, 100.0);
        }
    }
}
