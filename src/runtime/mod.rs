//! Cold-start protocol and the long running process that ties the timer, the track
//! reconciler and the reminder scheduler together.

pub mod lifecycle;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use chrono::{Local, TimeZone};
use lifecycle::Lifecycle;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    clock::{
        engine::ClockEngine, state::SessionKind, store::JsonStateStore, ClockEvent, ClockSnapshot,
    },
    reminders::{
        scheduler::{reminder_id_of, RebuildReport, RecurrenceScheduler, SchedulerConfig},
        store::JsonReminderStore,
    },
    track::{JsonLinesTrackLog, ReconcilerConfig, TrackReconciler},
    utils::clock::{Clock, DefaultClock},
    wakeup::{table::LocalWakeupTable, RecurrenceRule},
};

const TRACK_LOG_FILE: &str = "track.jsonl";
const REMINDERS_FILE: &str = "reminders.json";
const WAKEUPS_FILE: &str = "wakeups.json";

/// How often the runtime looks for reminder wake-ups that came due.
pub const DELIVERY_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Where the core keeps its files and who this device is.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub dir: PathBuf,
    pub device_id: String,
    pub remote_channel: bool,
    /// Whether the platform lets us schedule exact wake-ups.
    pub exact_wakeups: bool,
}

impl RuntimeConfig {
    pub fn track_log_path(&self) -> PathBuf {
        self.dir.join(TRACK_LOG_FILE)
    }

    pub fn reminders_path(&self) -> PathBuf {
        self.dir.join(REMINDERS_FILE)
    }

    pub fn wakeups_path(&self) -> PathBuf {
        self.dir.join(WAKEUPS_FILE)
    }

    pub fn state_dir(&self) -> &Path {
        &self.dir
    }
}

/// Device id used when none is configured.
pub fn default_device_id() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "local".into())
}

/// Everything a front end needs, wired against the files of one application directory.
pub struct Components<Tz: TimeZone> {
    pub engine: ClockEngine,
    pub reconciler: TrackReconciler<Arc<JsonLinesTrackLog>>,
    pub scheduler: RecurrenceScheduler<Tz>,
    pub reminders: Arc<JsonReminderStore>,
    pub wakeups: Arc<LocalWakeupTable>,
    pub clock: Arc<dyn Clock>,
}

impl<Tz> Components<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    pub async fn open(
        config: &RuntimeConfig,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Result<Self> {
        let wakeups =
            Arc::new(LocalWakeupTable::open(config.wakeups_path(), config.exact_wakeups).await?);
        let reminders = Arc::new(JsonReminderStore::new(config.reminders_path()));
        let engine = ClockEngine::new(
            Arc::new(JsonStateStore::new(config.state_dir())),
            wakeups.clone(),
            clock.clone(),
        );
        let reconciler = TrackReconciler::new(
            Arc::new(JsonLinesTrackLog::new(config.track_log_path())),
            clock.clone(),
            ReconcilerConfig::default(),
        );
        let scheduler = RecurrenceScheduler::new(
            reminders.clone(),
            wakeups.clone(),
            clock.clone(),
            timezone,
            SchedulerConfig {
                device_id: config.device_id.clone(),
                remote_channel: config.remote_channel,
            },
        );
        Ok(Self {
            engine,
            reconciler,
            scheduler,
            reminders,
            wakeups,
            clock,
        })
    }

    /// Rebuilds every wake-up then puts the timer back on its feet. The rebuild clears the
    /// whole wake-up table, so the clock is restored after it.
    pub async fn cold_start(&self) -> (RebuildReport, ClockSnapshot) {
        let report = self.scheduler.rebuild().await;
        let snapshot = self.engine.restore().await;
        let tracked = snapshot
            .session
            .as_ref()
            .is_some_and(|s| s.kind == SessionKind::Activity);
        self.reconciler.on_mount(tracked).await;
        info!(
            "Cold start done: {} reminders scheduled, timer {:?}",
            report.scheduled.len(),
            snapshot.phase
        );
        (report, snapshot)
    }

    /// Reports reminder wake-ups whose trigger has passed, marks one-time ones delivered and
    /// rebuilds so recurring ones move to their next occurrence. Returns how many were due.
    ///
    /// Timer and wake-up changes made by other invocations since the last call are picked up
    /// first.
    pub async fn deliver_due(&self) -> usize {
        self.engine.refresh().await;
        let now = self.clock.time();
        let due = self
            .wakeups
            .registrations()
            .await
            .into_iter()
            .filter(|r| r.trigger <= now && reminder_id_of(&r.id).is_some())
            .collect::<Vec<_>>();
        if due.is_empty() {
            return 0;
        }

        for registration in &due {
            let Some(reminder_id) = reminder_id_of(&registration.id) else {
                continue;
            };
            info!(
                "Reminder due: {} ({})",
                registration.payload.title, registration.payload.body
            );
            if registration.rule == RecurrenceRule::Once {
                // Already logged by the scheduler. The rebuild drops the past trigger anyway.
                let _ = self.scheduler.acknowledge_delivery(reminder_id).await;
            }
        }

        self.scheduler.rebuild().await;
        self.engine.reissue_wakeup().await;
        due.len()
    }

    async fn on_lifecycle(&self, event: Lifecycle) {
        match event {
            Lifecycle::Foreground => {
                self.engine.tick().await;
                self.reconciler.on_foreground().await;
            }
            Lifecycle::Background => self.reconciler.on_background(),
        }
    }

    /// Reacts to lifecycle transitions, timer alarms and due reminders until `shutdown` is
    /// cancelled.
    pub async fn run(
        &self,
        mut lifecycle: mpsc::Receiver<Lifecycle>,
        shutdown: CancellationToken,
    ) {
        let mut events = self.engine.subscribe();
        let mut check_point = self.clock.instant();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = lifecycle.recv() => {
                    debug!("Lifecycle transition {event:?}");
                    self.on_lifecycle(event).await;
                }
                event = events.recv() => match event {
                    Ok(ClockEvent::Alarm(snapshot)) => {
                        let label = snapshot.session.map(|s| s.label).unwrap_or_default();
                        info!("Timer '{label}' finished");
                    }
                    Ok(ClockEvent::Tick(_)) => (),
                    Err(RecvError::Lagged(skipped)) => debug!("Skipped {skipped} clock events"),
                    Err(RecvError::Closed) => break,
                },
                _ = self.clock.sleep_until(check_point) => {
                    check_point += DELIVERY_CHECK_INTERVAL;
                    self.deliver_due().await;
                }
            }
        }

        self.reconciler.on_unmount();
        info!("Runtime stopped");
    }
}

/// Entry point of `pacekeeper run`.
pub async fn start_runtime(config: RuntimeConfig) -> Result<()> {
    let components = Components::open(&config, Arc::new(DefaultClock), Local).await?;
    components.cold_start().await;

    let shutdown = CancellationToken::new();
    let (sender, receiver) = mpsc::channel::<Lifecycle>(8);

    let (_, lifecycle_result, _) = tokio::join!(
        lifecycle::detect_shutdown(shutdown.clone()),
        lifecycle::detect_lifecycle(sender, shutdown.clone()),
        components
            .run(receiver, shutdown.clone())
            .instrument(info_span!("runtime")),
    );

    if let Err(e) = lifecycle_result {
        error!("Lifecycle listener failed {e:?}");
    }
    Ok(())
}
