use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    utils::clock::Clock,
    wakeup::{schedule_best_effort, RecurrenceRule, WakeupPayload, WakeupRegistrar},
};

use super::{
    state::{ClockError, Session, SessionKind, TickOutcome, TimerMode, TimerPhase, TimerState},
    store::{PersistedClock, StateStore},
};

/// Id of the native wake-up that ends a count-down while the process is suspended.
pub const TIMER_WAKEUP_ID: &str = "session-timer";

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 16;

/// Read-only view of the engine at a given moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub session: Option<Session>,
    pub mode: TimerMode,
    pub phase: TimerPhase,
    pub elapsed: chrono::Duration,
    pub remaining: Option<chrono::Duration>,
    pub fires_at: Option<DateTime<Utc>>,
}

impl ClockSnapshot {
    fn of(state: &PersistedClock, now: DateTime<Utc>) -> Self {
        Self {
            session: state.session.clone(),
            mode: state.timer.mode,
            phase: state.timer.phase(),
            elapsed: state.timer.elapsed(now),
            remaining: state.timer.remaining(now),
            fires_at: state.timer.fires_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    Tick(ClockSnapshot),
    /// Terminal event of a count-down. Sent once per run.
    Alarm(ClockSnapshot),
}

/// State shared between the engine handle and its tick task.
struct EngineCore {
    state: Mutex<PersistedClock>,
    store: Arc<dyn StateStore>,
    wakeups: Arc<dyn WakeupRegistrar>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ClockEvent>,
}

impl EngineCore {
    async fn checkpoint(&self, state: &PersistedClock) {
        if let Err(e) = self.store.save(state).await {
            error!("Failed to persist timer state {e:?}");
        }
    }

    /// Runs one tick against the locked state. Returns false once nothing is running anymore.
    async fn advance(&self, state: &mut PersistedClock) -> bool {
        let now = self.clock.time();
        match state.timer.tick(now) {
            TickOutcome::Stopped => false,
            TickOutcome::Running { .. } => {
                let _ = self.events.send(ClockEvent::Tick(ClockSnapshot::of(state, now)));
                true
            }
            TickOutcome::Fired => {
                info!("Count-down finished");
                self.checkpoint(state).await;
                // The in-process alarm covers it, the native one would notify a second time.
                if let Err(e) = self.wakeups.cancel(TIMER_WAKEUP_ID).await {
                    warn!("Failed to cancel timer wake-up after alarm {e:?}");
                }
                let _ = self
                    .events
                    .send(ClockEvent::Alarm(ClockSnapshot::of(state, now)));
                false
            }
        }
    }

    async fn register_wakeup(&self, state: &PersistedClock) {
        let Some(fires_at) = state.timer.fires_at() else {
            return;
        };
        let label = state
            .session
            .as_ref()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        let payload = WakeupPayload {
            title: label,
            body: "Timer finished".into(),
        };
        match schedule_best_effort(
            self.wakeups.as_ref(),
            fires_at,
            TIMER_WAKEUP_ID,
            payload,
            RecurrenceRule::Once,
        )
        .await
        {
            Ok(precision) => debug!("Timer wake-up set for {fires_at} ({precision:?})"),
            Err(e) => error!("Failed to register timer wake-up {e:?}"),
        }
    }

    async fn deregister_wakeup(&self) {
        if let Err(e) = self.wakeups.cancel(TIMER_WAKEUP_ID).await {
            error!("Failed to cancel timer wake-up {e:?}");
        }
    }
}

/// Owns the single active session of the process and its timer.
///
/// All mutation goes through the methods below; each transition is checkpointed to the
/// [StateStore] before it returns. Persistence and wake-up failures are logged and never
/// undo a transition.
#[derive(Clone)]
pub struct ClockEngine {
    core: Arc<EngineCore>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl ClockEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        wakeups: Arc<dyn WakeupRegistrar>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            core: Arc::new(EngineCore {
                state: Mutex::new(PersistedClock::default()),
                store,
                wakeups,
                clock,
                events,
            }),
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.core.events.subscribe()
    }

    pub async fn snapshot(&self) -> ClockSnapshot {
        let state = self.core.state.lock().await;
        ClockSnapshot::of(&state, self.core.clock.time())
    }

    /// Loads the checkpoint written by a previous process. Anything that fails the invariant
    /// check is replaced by an idle state.
    pub async fn restore(&self) -> ClockSnapshot {
        let loaded = match self.core.store.load().await {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                warn!("Persisted timer state is unreadable, resetting {e:?}");
                let idle = PersistedClock::default();
                self.core.checkpoint(&idle).await;
                idle
            }
        };
        let loaded = match loaded.timer.check(loaded.session.is_some()) {
            Ok(()) => loaded,
            Err(reason) => {
                warn!("Persisted timer state is corrupt ({reason}), resetting");
                let idle = PersistedClock::default();
                self.core.checkpoint(&idle).await;
                idle
            }
        };

        {
            let mut state = self.core.state.lock().await;
            *state = loaded;
            info!("Restored timer in phase {:?}", state.timer.phase());
            // Catches a count-down that ran out while the process was gone.
            if self.core.advance(&mut state).await {
                self.core.register_wakeup(&state).await;
                self.spawn_ticker().await;
            } else {
                self.cancel_ticker().await;
            }
        }
        self.snapshot().await
    }

    /// Adopts a checkpoint another process wrote since this one last saved. A matching
    /// checkpoint leaves the engine and its ticker untouched.
    pub async fn refresh(&self) -> ClockSnapshot {
        let unchanged = match self.core.store.load().await {
            Ok(loaded) => loaded.unwrap_or_default() == *self.core.state.lock().await,
            Err(_) => false,
        };
        if unchanged {
            return self.snapshot().await;
        }
        debug!("Timer checkpoint changed on disk");
        self.restore().await
    }

    pub async fn start_count_up(&self, label: &str, kind: SessionKind) -> Result<ClockSnapshot> {
        let mut state = self.core.state.lock().await;
        self.begin(&mut state, TimerMode::CountUp, chrono::Duration::zero(), label, kind)
            .await
    }

    pub async fn start_count_down(
        &self,
        duration: chrono::Duration,
        label: &str,
    ) -> Result<ClockSnapshot> {
        let mut state = self.core.state.lock().await;
        self.begin(&mut state, TimerMode::CountDown, duration, label, SessionKind::Timer)
            .await
    }

    /// Starts a session on the locked state. The ticker is only ever replaced or aborted while
    /// the state lock is held, so a concurrent transition can't orphan it.
    async fn begin(
        &self,
        state: &mut PersistedClock,
        mode: TimerMode,
        duration: chrono::Duration,
        label: &str,
        kind: SessionKind,
    ) -> Result<ClockSnapshot> {
        if state.timer.phase() != TimerPhase::Idle {
            return Err(ClockError::SessionActive.into());
        }
        let now = self.core.clock.time();
        if mode == TimerMode::CountDown {
            TimerState::check_count_down(duration, now)?;
        }
        state.session = Some(Session {
            label: label.to_owned(),
            kind,
            started_at: now,
        });
        state.timer.start(mode, duration, now);
        self.core.checkpoint(state).await;
        self.core.register_wakeup(state).await;
        self.spawn_ticker().await;
        info!("Started {mode:?} session '{label}'");
        Ok(ClockSnapshot::of(state, now))
    }

    /// Pausing an already paused timer is a no-op. A count-down that ran out before the pause
    /// fires instead of freezing at zero.
    pub async fn pause(&self) -> Result<ClockSnapshot> {
        let mut state = self.core.state.lock().await;
        let now = self.core.clock.time();
        if state.timer.phase() == TimerPhase::Running && !self.core.advance(&mut state).await {
            self.cancel_ticker().await;
            return Ok(ClockSnapshot::of(&state, now));
        }
        if state.timer.pause(now)? {
            self.core.checkpoint(&state).await;
            if state.timer.mode == TimerMode::CountDown {
                self.core.deregister_wakeup().await;
            }
            debug!("Paused at {:?}", state.timer.frozen_remainder);
        }
        self.cancel_ticker().await;
        Ok(ClockSnapshot::of(&state, now))
    }

    pub async fn resume(&self) -> Result<ClockSnapshot> {
        let mut state = self.core.state.lock().await;
        let now = self.core.clock.time();
        state.timer.resume(now)?;
        self.core.checkpoint(&state).await;
        self.core.register_wakeup(&state).await;
        self.spawn_ticker().await;
        Ok(ClockSnapshot::of(&state, now))
    }

    /// Runs a single tick outside of the loop. Useful right after the app returns to the
    /// foreground, before the next scheduled tick.
    pub async fn tick(&self) -> ClockSnapshot {
        let mut state = self.core.state.lock().await;
        self.core.advance(&mut state).await;
        ClockSnapshot::of(&state, self.core.clock.time())
    }

    /// Drops the session whatever phase it is in. No-op when idle.
    pub async fn cancel(&self) -> ClockSnapshot {
        let mut state = self.core.state.lock().await;
        if state.timer.phase() != TimerPhase::Idle || state.session.is_some() {
            *state = PersistedClock::default();
            self.core.checkpoint(&state).await;
            self.core.deregister_wakeup().await;
            info!("Session released");
        }
        self.cancel_ticker().await;
        ClockSnapshot::of(&state, self.core.clock.time())
    }

    pub async fn reset(&self) -> ClockSnapshot {
        self.cancel().await
    }

    /// Runs the finished count-down again with the same duration and label.
    pub async fn restart(&self) -> Result<ClockSnapshot> {
        let mut state = self.core.state.lock().await;
        if state.timer.phase() != TimerPhase::Fired {
            return Err(ClockError::NotFired.into());
        }
        let duration = state.timer.total_duration;
        let label = state
            .session
            .as_ref()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        *state = PersistedClock::default();
        self.begin(&mut state, TimerMode::CountDown, duration, &label, SessionKind::Timer)
            .await
    }

    /// Registers the timer wake-up again, for example after the reminder rebuild cleared
    /// every native wake-up.
    pub async fn reissue_wakeup(&self) {
        let state = self.core.state.lock().await;
        self.core.register_wakeup(&state).await;
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let core = self.core.clone();
        let tick_interval = self.tick_interval;
        let handle = tokio::spawn(
            async move {
                let mut tick_point = core.clock.instant();
                loop {
                    tick_point += tick_interval;
                    core.clock.sleep_until(tick_point).await;

                    let mut state = core.state.lock().await;
                    if !core.advance(&mut state).await {
                        debug!("Ticker stopped in phase {:?}", state.timer.phase());
                        break;
                    }
                }
            }
            .instrument(info_span!("timer ticker")),
        );

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    async fn ticker_alive(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::{
        clock::{
            state::{ClockError, SessionKind, TimerMode, TimerPhase},
            store::{MemoryStateStore, PersistedClock, StateStore},
        },
        utils::{clock::testing::TestClock, logging::TEST_LOGGING, time::parse_duration},
        wakeup::{table::LocalWakeupTable, MockWakeupRegistrar},
    };

    use super::{ClockEngine, ClockEvent, TIMER_WAKEUP_ID};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn start() -> DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE)
    }

    struct Harness {
        engine: ClockEngine,
        clock: Arc<TestClock>,
        store: Arc<MemoryStateStore>,
        wakeups: Arc<LocalWakeupTable>,
    }

    fn harness_with(store: MemoryStateStore) -> Harness {
        *TEST_LOGGING;
        let clock = Arc::new(TestClock::new(start()));
        let store = Arc::new(store);
        let wakeups = Arc::new(LocalWakeupTable::in_memory(true));
        let engine = ClockEngine::new(store.clone(), wakeups.clone(), clock.clone());
        Harness {
            engine,
            clock,
            store,
            wakeups,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStateStore::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_active_session() -> Result<()> {
        let h = harness();
        h.engine.start_count_up("Run", SessionKind::Activity).await?;
        let err = h
            .engine
            .start_count_down(Duration::minutes(1), "Plank")
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ClockError>(), Some(&ClockError::SessionActive));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_empty_count_down() {
        let h = harness();
        let err = h
            .engine
            .start_count_down(Duration::zero(), "Nothing")
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ClockError>(), Some(&ClockError::InvalidDuration));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_count_down_past_the_calendar() -> Result<()> {
        let h = harness();
        let err = h
            .engine
            .start_count_down(parse_duration("9000000000000")?, "Forever")
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ClockError>(), Some(&ClockError::InvalidDuration));
        assert_eq!(h.engine.snapshot().await.phase, TimerPhase::Idle);
        assert!(h.wakeups.registrations().await.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_down_alarm_fires_once_through_ticker() -> Result<()> {
        let h = harness();
        let mut events = h.engine.subscribe();
        h.engine
            .start_count_down(Duration::seconds(3), "Plank")
            .await?;
        assert_eq!(h.wakeups.registrations().await.len(), 1);

        let mut ticks = 0;
        loop {
            match events.recv().await? {
                ClockEvent::Tick(_) => ticks += 1,
                ClockEvent::Alarm(snapshot) => {
                    assert_eq!(snapshot.phase, TimerPhase::Fired);
                    assert_eq!(snapshot.remaining, Some(Duration::zero()));
                    break;
                }
            }
        }
        assert_eq!(ticks, 2);

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert!(h.wakeups.registrations().await.is_empty());

        let persisted = h.store.load().await?.unwrap();
        assert!(persisted.timer.alarm_fired);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_does_not_desync() -> Result<()> {
        let h = harness();
        h.engine.start_count_up("Ride", SessionKind::Activity).await?;
        // The device sleeps for 40 minutes without a single tick being delivered.
        h.clock.jump(Duration::minutes(40));
        let snapshot = h.engine.tick().await;
        assert_eq!(snapshot.elapsed, Duration::minutes(40));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_moves_wakeup() -> Result<()> {
        let h = harness();
        h.engine
            .start_count_down(Duration::minutes(10), "Tea")
            .await?;
        h.clock.jump(Duration::minutes(4));
        let paused = h.engine.pause().await?;
        assert_eq!(paused.remaining, Some(Duration::minutes(6)));
        assert!(h.wakeups.registrations().await.is_empty());

        // Pausing twice changes nothing.
        assert_eq!(h.engine.pause().await?, paused);

        h.clock.jump(Duration::hours(2));
        let resumed = h.engine.resume().await?;
        assert_eq!(resumed.remaining, paused.remaining);
        assert_eq!(h.engine.tick().await.remaining, paused.remaining);

        let registrations = h.wakeups.registrations().await;
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].id, TIMER_WAKEUP_ID);
        assert_eq!(
            registrations[0].trigger,
            start() + Duration::minutes(4) + Duration::hours(2) + Duration::minutes(6)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_after_expiry_fires() -> Result<()> {
        let h = harness();
        let mut events = h.engine.subscribe();
        h.engine
            .start_count_down(Duration::minutes(1), "Stretch")
            .await?;
        h.clock.jump(Duration::minutes(5));
        let snapshot = h.engine.pause().await?;
        assert_eq!(snapshot.phase, TimerPhase::Fired);
        assert!(matches!(events.recv().await?, ClockEvent::Alarm(_)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_only_from_fired() -> Result<()> {
        let h = harness();
        let err = h.engine.restart().await.unwrap_err();
        assert_eq!(err.downcast_ref::<ClockError>(), Some(&ClockError::NotFired));

        h.engine
            .start_count_down(Duration::seconds(30), "Rest")
            .await?;
        h.clock.jump(Duration::seconds(31));
        assert_eq!(h.engine.tick().await.phase, TimerPhase::Fired);

        let restarted = h.engine.restart().await?;
        assert_eq!(restarted.phase, TimerPhase::Running);
        assert_eq!(restarted.remaining, Some(Duration::seconds(30)));
        assert_eq!(restarted.session.unwrap().label, "Rest");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_everything() -> Result<()> {
        let h = harness();
        h.engine
            .start_count_down(Duration::minutes(5), "Plank")
            .await?;
        let snapshot = h.engine.cancel().await;
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.session, None);
        assert!(h.wakeups.registrations().await.is_empty());
        assert_eq!(h.store.load().await?, Some(PersistedClock::default()));

        // A new session may start right away.
        h.engine.start_count_up("Walk", SessionKind::Activity).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_running_timer() -> Result<()> {
        let first = harness();
        first
            .engine
            .start_count_down(Duration::minutes(10), "Bake")
            .await?;
        let raw = first.store.raw().unwrap();

        // A new process starts three minutes later with no wake-ups registered.
        let second = harness_with(MemoryStateStore::with_raw(&raw));
        second.clock.jump(Duration::minutes(3));
        let restored = second.engine.restore().await;
        assert_eq!(restored.phase, TimerPhase::Running);
        assert_eq!(restored.remaining, Some(Duration::minutes(7)));
        assert_eq!(second.wakeups.registrations().await.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_adopts_checkpoint_of_another_process() -> Result<()> {
        let runtime = harness();
        runtime.engine.restore().await;
        runtime
            .engine
            .start_count_down(Duration::minutes(10), "Bake")
            .await?;
        assert_eq!(runtime.engine.refresh().await.phase, TimerPhase::Running);

        // Another invocation cancels the timer through the shared checkpoint.
        runtime
            .store
            .save(&PersistedClock::default())
            .await?;
        let refreshed = runtime.engine.refresh().await;
        assert_eq!(refreshed.phase, TimerPhase::Idle);
        assert!(!runtime.engine.ticker_alive().await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_fires_expired_count_down() -> Result<()> {
        let first = harness();
        first
            .engine
            .start_count_down(Duration::minutes(1), "Eggs")
            .await?;
        let raw = first.store.raw().unwrap();

        let second = harness_with(MemoryStateStore::with_raw(&raw));
        let mut events = second.engine.subscribe();
        second.clock.jump(Duration::minutes(30));
        let restored = second.engine.restore().await;
        assert_eq!(restored.phase, TimerPhase::Fired);
        assert!(matches!(events.recv().await?, ClockEvent::Alarm(_)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resets_corrupt_state() -> Result<()> {
        let corrupt = r#"{"session":null,"timer":{"mode":"countDown","startAnchor":null,"frozenRemainder":null,"totalDuration":60000,"running":true,"paused":false,"alarmFired":false}}"#;
        let h = harness_with(MemoryStateStore::with_raw(corrupt));
        let restored = h.engine.restore().await;
        assert_eq!(restored.phase, TimerPhase::Idle);
        assert_eq!(h.store.load().await?, Some(PersistedClock::default()));

        let h = harness_with(MemoryStateStore::with_raw("not json"));
        assert_eq!(h.engine.restore().await.phase, TimerPhase::Idle);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resets_count_down_ending_past_the_calendar() -> Result<()> {
        let huge = r#"{"session":{"label":"Forever","kind":"timer","startedAt":"2018-07-04T00:00:00Z"},"timer":{"mode":"countDown","startAnchor":"2018-07-04T00:00:00Z","frozenRemainder":null,"totalDuration":9000000000000000,"running":true,"paused":false,"alarmFired":false}}"#;
        let h = harness_with(MemoryStateStore::with_raw(huge));
        let restored = h.engine.restore().await;
        assert_eq!(restored.phase, TimerPhase::Idle);
        assert!(h.wakeups.registrations().await.is_empty());
        assert_eq!(h.store.load().await?, Some(PersistedClock::default()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pause_and_resume_keep_ticker_in_step() -> Result<()> {
        let h = harness();
        h.engine.start_count_up("Row", SessionKind::Activity).await?;

        for _ in 0..200 {
            let pausing = tokio::spawn({
                let engine = h.engine.clone();
                async move { engine.pause().await }
            });
            let resuming = tokio::spawn({
                let engine = h.engine.clone();
                async move { engine.resume().await }
            });
            let _ = pausing.await?;
            let _ = resuming.await?;

            let running = h.engine.snapshot().await.phase == TimerPhase::Running;
            assert_eq!(h.engine.ticker_alive().await, running);
        }
        h.engine.cancel().await;
        assert!(!h.engine.ticker_alive().await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakeup_failure_does_not_block_start() -> Result<()> {
        *TEST_LOGGING;
        let mut registrar = MockWakeupRegistrar::new();
        registrar.expect_exact_permitted().return_const(true);
        registrar
            .expect_schedule()
            .returning(|_, _, _, _| Err(anyhow::anyhow!("no alarm service")));
        registrar.expect_cancel().returning(|_| Ok(()));

        let engine = ClockEngine::new(
            Arc::new(MemoryStateStore::default()),
            Arc::new(registrar),
            Arc::new(TestClock::new(start())),
        );
        let snapshot = engine
            .start_count_down(Duration::minutes(1), "Plank")
            .await?;
        assert_eq!(snapshot.phase, TimerPhase::Running);
        assert_eq!(snapshot.mode, TimerMode::CountDown);
        engine.cancel().await;
        Ok(())
    }
}
