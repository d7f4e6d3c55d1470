//! Cancellable repeating task with per-cycle jitter.
//!
//! Replaces literal timer chaining: each cycle runs the task, then sleeps a
//! freshly jittered interval. `trigger` runs the task out of band; `stop`
//! cancels the pending sleep and waits for the task to exit.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Shortest interval ever scheduled, jitter included.
pub const MIN_INTERVAL_MS: u64 = 5_000;

const JITTER_MS: u64 = 10_000;

/// Next interval for a configured base, with jitter applied.
///
/// Base ≥ 30s draws a uniform offset in [-10s, +10s]; shorter bases draw in
/// [0, +10s] so aggressive configurations never jitter downwards into a
/// request storm. The result is floored at [`MIN_INTERVAL_MS`].
pub fn jittered_interval_ms(base_ms: u64, rng: &mut impl Rng) -> u64 {
    let with_jitter = if base_ms >= 30_000 {
        let offset = rng.gen_range(-(JITTER_MS as i64)..=JITTER_MS as i64);
        base_ms.saturating_add_signed(offset)
    } else {
        base_ms + rng.gen_range(0..=JITTER_MS)
    };
    with_jitter.max(MIN_INTERVAL_MS)
}

/// Handle to a spawned repeating task.
pub struct RepeatingTask {
    shutdown: watch::Sender<bool>,
    run_now: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Spawns the repeating loop. The task runs once per cycle; cycles are
    /// separated by a jittered interval derived from `base_interval`.
    pub fn spawn<F, Fut>(base_interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let run_now = Arc::new(Notify::new());
        let run_now_rx = run_now.clone();
        let base_ms = base_interval.as_millis() as u64;

        let handle = tokio::spawn(async move {
            loop {
                task().await;

                let interval = jittered_interval_ms(base_ms, &mut rand::thread_rng());
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    _ = run_now_rx.notified() => {}
                    changed = shutdown_rx.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            run_now,
            handle,
        }
    }

    /// Cuts the current sleep short and runs the task immediately.
    pub fn trigger(&self) {
        self.run_now.notify_one();
    }

    /// Stops the loop and waits for the task to exit. A task mid-run
    /// finishes its current cycle first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jitter_bounds_for_long_base() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let interval = jittered_interval_ms(60_000, &mut rng);
            assert!((50_000..=70_000).contains(&interval));
        }
    }

    #[test]
    fn test_jitter_never_negative_for_short_base() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let interval = jittered_interval_ms(10_000, &mut rng);
            assert!((10_000..=20_000).contains(&interval));
        }
    }

    #[test]
    fn test_floor_applies_to_tiny_base() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(jittered_interval_ms(0, &mut rng) >= MIN_INTERVAL_MS);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_task_runs_and_stops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = RepeatingTask::spawn(Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // First cycle runs immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // The next cycle lands within the jitter window.
        tokio::time::sleep(Duration::from_secs(71)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        task.stop().await;
        let after_stop = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = RepeatingTask::spawn(Duration::from_secs(600), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        task.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        task.stop().await;
    }
}
