use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::utils::clock::Clock;

use super::{entities::TrackPoint, log::TrackLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Catches the first read beating the collector's flush.
    pub settle_delay: Duration,
    /// Count-only check that re-hydrates if the log grew since the last read.
    pub verify_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            verify_delay: Duration::from_secs(3),
        }
    }
}

/// What the foreground currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub points: Arc<[TrackPoint]>,
    pub hydrated: bool,
    pub low_water_mark: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateOutcome {
    Hydrated { points: usize },
    /// Another hydration was already reading the log.
    Skipped,
    /// The read failed. The previous points are kept.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Unchanged,
    Rehydrated(HydrateOutcome),
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum DelayedPass {
    Settle,
    Verify,
}

struct TrackView {
    points: Arc<[TrackPoint]>,
    hydrated: bool,
    low_water_mark: usize,
    /// Bumped on every background transition. A read that started in an older generation may
    /// still publish its points but never marks the track hydrated.
    generation: u64,
}

/// Released on drop so a failed or cancelled read never leaves the guard stuck.
struct HydrationGuard<'a>(&'a AtomicBool);

impl<'a> HydrationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for HydrationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner<L> {
    log: L,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    view: watch::Sender<TrackView>,
    hydrating: AtomicBool,
    pending: std::sync::Mutex<Option<CancellationToken>>,
}

/// Keeps an in-memory copy of the track log that is only ever replaced wholesale from a
/// complete read. The log is written by another process, so the only staleness signal is
/// whether its row count grew since the last read.
pub struct TrackReconciler<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for TrackReconciler<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: TrackLog> TrackReconciler<L> {
    pub fn new(log: L, clock: Arc<dyn Clock>, config: ReconcilerConfig) -> Self {
        let (view, _) = watch::channel(TrackView {
            points: Arc::from(Vec::new()),
            hydrated: false,
            low_water_mark: 0,
            generation: 0,
        });
        Self {
            inner: Arc::new(Inner {
                log,
                clock,
                config,
                view,
                hydrating: AtomicBool::new(false),
                pending: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn log(&self) -> &L {
        &self.inner.log
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        let view = self.inner.view.borrow();
        TrackSnapshot {
            points: view.points.clone(),
            hydrated: view.hydrated,
            low_water_mark: view.low_water_mark,
        }
    }

    /// Replaces the in-memory track with a full read of the log. A call made while another
    /// hydration is reading is dropped, not queued.
    pub async fn hydrate(&self) -> HydrateOutcome {
        let Some(_guard) = HydrationGuard::acquire(&self.inner.hydrating) else {
            debug!("Hydration already in progress");
            return HydrateOutcome::Skipped;
        };
        let generation = self.inner.view.borrow().generation;

        match self.inner.log.read_all().await {
            Ok(points) => {
                let count = points.len();
                let points: Arc<[TrackPoint]> = points.into();
                self.inner.view.send_modify(|view| {
                    view.points = points;
                    view.low_water_mark = count;
                    if view.generation == generation {
                        view.hydrated = true;
                    } else {
                        debug!("Went to background during hydration, track stays stale");
                    }
                });
                debug!("Hydrated {count} track points");
                HydrateOutcome::Hydrated { points: count }
            }
            Err(e) => {
                warn!("Failed to read track log {e:?}");
                self.inner.view.send_modify(|view| view.hydrated = false);
                HydrateOutcome::Failed
            }
        }
    }

    /// Re-hydrates only if the log has more rows than the last hydration saw.
    pub async fn verify(&self) -> VerifyOutcome {
        let low_water_mark = self.inner.view.borrow().low_water_mark;
        match self.inner.log.count().await {
            Ok(count) if count > low_water_mark => {
                info!("Track log grew from {low_water_mark} to {count} rows, re-hydrating");
                VerifyOutcome::Rehydrated(self.hydrate().await)
            }
            Ok(_) => VerifyOutcome::Unchanged,
            Err(e) => {
                warn!("Failed to count track rows {e:?}");
                self.inner.view.send_modify(|view| view.hydrated = false);
                VerifyOutcome::Failed
            }
        }
    }

    /// Hydrates when the screen mounts over an active tracked session.
    pub async fn on_mount(&self, session_tracked: bool) -> Option<HydrateOutcome> {
        if session_tracked {
            Some(self.hydrate().await)
        } else {
            None
        }
    }

    /// Hydrates now and schedules the settle and verify passes. Replaces passes left over
    /// from an earlier foreground transition.
    pub async fn on_foreground(&self) -> HydrateOutcome {
        let token = self.replace_pending();
        self.spawn_delayed(token.clone(), DelayedPass::Settle);
        self.spawn_delayed(token, DelayedPass::Verify);
        self.hydrate().await
    }

    pub fn on_background(&self) {
        self.cancel_pending();
        self.inner.view.send_modify(|view| {
            view.generation += 1;
            view.hydrated = false;
        });
        debug!("Track marked stale");
    }

    pub fn on_unmount(&self) {
        self.cancel_pending();
    }

    /// Waits until the track is hydrated. Returns false on timeout.
    pub async fn wait_hydrated(&self, timeout: Duration) -> bool {
        let mut view = self.inner.view.subscribe();
        tokio::select! {
            result = view.wait_for(|v| v.hydrated) => result.is_ok(),
            _ = self.inner.clock.sleep(timeout) => false,
        }
    }

    fn replace_pending(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut pending) = self.inner.pending.lock() {
            if let Some(previous) = pending.replace(token.clone()) {
                previous.cancel();
            }
        }
        token
    }

    fn cancel_pending(&self) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            if let Some(token) = pending.take() {
                token.cancel();
            }
        }
    }

    fn spawn_delayed(&self, token: CancellationToken, pass: DelayedPass) {
        let delay = match pass {
            DelayedPass::Settle => self.inner.config.settle_delay,
            DelayedPass::Verify => self.inner.config.verify_delay,
        };
        let reconciler = self.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => debug!("Cancelled"),
                    _ = reconciler.inner.clock.sleep(delay) => match pass {
                        DelayedPass::Settle => {
                            reconciler.hydrate().await;
                        }
                        DelayedPass::Verify => {
                            reconciler.verify().await;
                        }
                    }
                }
            }
            .instrument(debug_span!("delayed_hydration", ?pass)),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{DateTime, TimeZone, Utc};

    use crate::{
        track::{entities::TrackPoint, log::testing::MemoryLog},
        utils::{clock::testing::TestClock, logging::TEST_LOGGING},
    };

    use super::{HydrateOutcome, ReconcilerConfig, TrackReconciler, VerifyOutcome};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 30, 0).unwrap()
    }

    fn point(seconds: i64) -> TrackPoint {
        TrackPoint {
            timestamp: start() + chrono::Duration::seconds(seconds),
            latitude: 50.45,
            longitude: 30.52,
            altitude: None,
            accuracy: None,
            is_stationary: false,
            is_bad_signal: false,
            confidence: None,
        }
    }

    fn reconciler(log: Arc<MemoryLog>) -> TrackReconciler<Arc<MemoryLog>> {
        *TEST_LOGGING;
        TrackReconciler::new(
            log,
            Arc::new(TestClock::new(start())),
            ReconcilerConfig::default(),
        )
    }

    /// Lets spawned passes run without advancing paused time.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hydration_is_idempotent() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        log.push(point(1));
        let reconciler = reconciler(log.clone());

        assert!(!reconciler.snapshot().hydrated);
        assert_eq!(
            reconciler.hydrate().await,
            HydrateOutcome::Hydrated { points: 2 }
        );
        let first = reconciler.snapshot();
        reconciler.hydrate().await;
        let second = reconciler.snapshot();

        assert_eq!(first, second);
        assert!(second.hydrated);
        assert_eq!(second.low_water_mark, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_hydration_is_dropped() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        log.delay_reads(Duration::from_millis(100));
        let reconciler = reconciler(log.clone());

        let (first, second) = tokio::join!(reconciler.hydrate(), reconciler.hydrate());
        assert_eq!(first, HydrateOutcome::Hydrated { points: 1 });
        assert_eq!(second, HydrateOutcome::Skipped);
        assert_eq!(log.reads(), 1);

        assert_eq!(
            reconciler.hydrate().await,
            HydrateOutcome::Hydrated { points: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_only_rehydrates_on_growth() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        let reconciler = reconciler(log.clone());
        reconciler.hydrate().await;

        assert_eq!(reconciler.verify().await, VerifyOutcome::Unchanged);
        assert_eq!(log.reads(), 1);

        log.push(point(1));
        assert_eq!(
            reconciler.verify().await,
            VerifyOutcome::Rehydrated(HydrateOutcome::Hydrated { points: 2 })
        );
        assert_eq!(log.reads(), 2);
        assert_eq!(reconciler.snapshot().points.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_catches_late_flush() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        let reconciler = reconciler(log.clone());

        assert_eq!(
            reconciler.on_foreground().await,
            HydrateOutcome::Hydrated { points: 1 }
        );

        // The collector flushes right after the first read.
        log.push(point(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(reconciler.snapshot().points.len(), 2);
        assert_eq!(log.reads(), 2);

        // Nothing new by the verify pass, so it only counts.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        settle().await;
        assert_eq!(log.counts(), 1);
        assert_eq!(log.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_pass_rehydrates_late_rows() {
        let log = Arc::new(MemoryLog::default());
        let reconciler = reconciler(log.clone());
        reconciler.on_foreground().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        log.push(point(0));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        settle().await;
        assert_eq!(log.counts(), 1);
        assert_eq!(reconciler.snapshot().points.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cancels_pending_passes() {
        let log = Arc::new(MemoryLog::default());
        let reconciler = reconciler(log.clone());
        reconciler.on_foreground().await;
        assert!(reconciler.snapshot().hydrated);

        reconciler.on_background();
        assert!(!reconciler.snapshot().hydrated);

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(log.reads(), 1);
        assert_eq!(log.counts(), 0);
        assert!(!reconciler.snapshot().hydrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_cancels_pending_passes() {
        let log = Arc::new(MemoryLog::default());
        let reconciler = reconciler(log.clone());
        reconciler.on_foreground().await;
        reconciler.on_unmount();

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(log.reads(), 1);
        assert!(reconciler.snapshot().hydrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_in_flight_across_background_stays_stale() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        log.delay_reads(Duration::from_millis(100));
        let reconciler = reconciler(log.clone());

        let background = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reconciler.on_background();
        };
        let (outcome, _) = tokio::join!(reconciler.hydrate(), background);

        assert_eq!(outcome, HydrateOutcome::Hydrated { points: 1 });
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.points.len(), 1);
        assert!(!snapshot.hydrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_known_good() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        let reconciler = reconciler(log.clone());
        reconciler.hydrate().await;

        log.fail(true);
        assert_eq!(reconciler.hydrate().await, HydrateOutcome::Failed);
        assert_eq!(reconciler.verify().await, VerifyOutcome::Failed);

        let snapshot = reconciler.snapshot();
        assert!(!snapshot.hydrated);
        assert_eq!(snapshot.points.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_count_marks_track_stale() {
        let log = Arc::new(MemoryLog::default());
        log.push(point(0));
        log.push(point(1));
        let reconciler = reconciler(log.clone());
        reconciler.hydrate().await;
        assert!(reconciler.snapshot().hydrated);

        log.fail(true);
        assert_eq!(reconciler.verify().await, VerifyOutcome::Failed);
        assert_eq!(log.reads(), 1);
        let snapshot = reconciler.snapshot();
        assert!(!snapshot.hydrated);
        assert_eq!(snapshot.points.len(), 2);

        log.fail(false);
        assert_eq!(
            reconciler.hydrate().await,
            HydrateOutcome::Hydrated { points: 2 }
        );
        assert!(reconciler.snapshot().hydrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_and_wait_hydrated() {
        let log = Arc::new(MemoryLog::default());
        let reconciler = reconciler(log.clone());

        assert_eq!(reconciler.on_mount(false).await, None);
        assert!(!reconciler.wait_hydrated(Duration::from_millis(10)).await);

        let waiter = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.wait_hydrated(Duration::from_secs(1)).await })
        };
        settle().await;
        assert!(reconciler.on_mount(true).await.is_some());
        assert!(waiter.await.unwrap());
    }
}
