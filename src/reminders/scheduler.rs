use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use futures::future::join;
use tracing::{debug, error, info, warn};

use crate::{
    utils::clock::Clock,
    wakeup::{schedule_best_effort, RecurrenceRule, WakeupPayload, WakeupRegistrar},
};

use super::{
    recurrence::{next_daily, next_one_time, next_weekly},
    spec::{ReminderCategory, ReminderSchedule, ReminderSpec},
    store::ReminderStore,
};

const WAKEUP_ID_PREFIX: &str = "reminder:";

/// Concrete registration derived from a [ReminderSpec] at a given moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAlarm {
    pub reminder_id: String,
    pub trigger: DateTime<Utc>,
    pub rule: RecurrenceRule,
    pub payload: WakeupPayload,
}

impl ScheduledAlarm {
    pub fn wakeup_id(&self) -> String {
        wakeup_id(&self.reminder_id)
    }
}

pub fn wakeup_id(reminder_id: &str) -> String {
    format!("{WAKEUP_ID_PREFIX}{reminder_id}")
}

/// Inverse of [wakeup_id]. `None` for wake-ups that don't belong to a reminder.
pub fn reminder_id_of(wakeup_id: &str) -> Option<&str> {
    wakeup_id.strip_prefix(WAKEUP_ID_PREFIX)
}

/// Who this device is, as far as reminder exclusivity goes.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub device_id: String,
    /// A push channel delivers shared reminders to their authoring device already.
    pub remote_channel: bool,
}

/// Computes the next trigger for a single reminder, `None` when it will never fire again.
pub fn plan_alarm<Tz: TimeZone>(
    spec: &ReminderSpec,
    now: &DateTime<Tz>,
) -> Option<ScheduledAlarm> {
    let (trigger, rule) = match &spec.schedule {
        ReminderSchedule::OneTime { notify_at } => {
            if spec.delivered {
                return None;
            }
            (
                next_one_time(*notify_at, now.with_timezone(&Utc))?,
                RecurrenceRule::Once,
            )
        }
        ReminderSchedule::Daily { notify_time } => (
            next_daily(now, *notify_time).with_timezone(&Utc),
            RecurrenceRule::Daily {
                hour: notify_time.hour(),
                minute: notify_time.minute(),
            },
        ),
        ReminderSchedule::Weekly {
            notify_time,
            weekdays,
        } => (
            next_weekly(now, *notify_time, weekdays)?.with_timezone(&Utc),
            RecurrenceRule::Weekly {
                hour: notify_time.hour(),
                minute: notify_time.minute(),
                weekdays: *weekdays,
            },
        ),
    };

    Some(ScheduledAlarm {
        reminder_id: spec.id.clone(),
        trigger,
        rule,
        payload: WakeupPayload {
            title: spec.title.clone(),
            body: spec.notes.clone(),
        },
    })
}

/// Shared reminders authored here are delivered by the remote channel when one is active,
/// scheduling them locally as well would notify twice.
pub fn covered_remotely(
    spec: &ReminderSpec,
    category: ReminderCategory,
    config: &SchedulerConfig,
) -> bool {
    category == ReminderCategory::Shared
        && config.remote_channel
        && spec.origin_device_id.as_deref() == Some(config.device_id.as_str())
}

/// Result of planning a batch of reminders.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    pub alarms: Vec<ScheduledAlarm>,
    pub skipped: Vec<String>,
}

/// Pure planning step of the rebuild: `{specs, now}` in, alarms out.
pub fn plan<'a, Tz: TimeZone>(
    batches: impl IntoIterator<Item = (ReminderCategory, &'a [ReminderSpec])>,
    now: &DateTime<Tz>,
    config: &SchedulerConfig,
) -> Plan {
    let mut result = Plan::default();
    for (category, specs) in batches {
        for spec in specs {
            if covered_remotely(spec, category, config) {
                debug!("Reminder {} is delivered remotely on this device", spec.id);
                result.skipped.push(spec.id.clone());
                continue;
            }
            match plan_alarm(spec, now) {
                Some(alarm) => result.alarms.push(alarm),
                None => result.skipped.push(spec.id.clone()),
            }
        }
    }
    result.alarms.sort_by(|a, b| a.reminder_id.cmp(&b.reminder_id));
    result
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub scheduled: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub failed_categories: Vec<ReminderCategory>,
}

/// Turns durable reminders into device wake-ups. The local wake-up table is never trusted,
/// every rebuild starts from an empty table.
pub struct RecurrenceScheduler<Tz> {
    store: Arc<dyn ReminderStore>,
    wakeups: Arc<dyn WakeupRegistrar>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    config: SchedulerConfig,
}

impl<Tz> RecurrenceScheduler<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    pub fn new(
        store: Arc<dyn ReminderStore>,
        wakeups: Arc<dyn WakeupRegistrar>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            wakeups,
            clock,
            timezone,
            config,
        }
    }

    /// Fetches every category. A failing category is logged and reported, never fatal.
    async fn fetch_all(
        &self,
    ) -> (
        Vec<(ReminderCategory, Vec<ReminderSpec>)>,
        Vec<ReminderCategory>,
    ) {
        let (personal, shared) = join(
            self.store.fetch(ReminderCategory::Personal),
            self.store.fetch(ReminderCategory::Shared),
        )
        .await;

        let mut fetched = vec![];
        let mut failed = vec![];
        for (category, result) in [
            (ReminderCategory::Personal, personal),
            (ReminderCategory::Shared, shared),
        ] {
            match result {
                Ok(specs) => fetched.push((category, specs)),
                Err(e) => {
                    error!("Failed to fetch {category} reminders: {e:?}");
                    failed.push(category);
                }
            }
        }
        (fetched, failed)
    }

    /// Plans against the current set without touching the wake-up table.
    pub async fn preview(&self) -> Plan {
        let (fetched, _) = self.fetch_all().await;
        let now = self.clock.time().with_timezone(&self.timezone);
        plan(
            fetched.iter().map(|(c, specs)| (*c, specs.as_slice())),
            &now,
            &self.config,
        )
    }

    /// Cancels every registered wake-up, then registers the current plan. Safe to run any
    /// number of times, including after a run that stopped halfway.
    pub async fn rebuild(&self) -> RebuildReport {
        if let Err(e) = self.wakeups.cancel_all().await {
            // Registration replaces by id, so surviving entries are overwritten below.
            warn!("Failed to clear wake-ups before rebuild: {e:?}");
        }

        let (fetched, failed_categories) = self.fetch_all().await;
        let Plan { alarms, skipped } = {
            let now = self.clock.time().with_timezone(&self.timezone);
            plan(
                fetched.iter().map(|(c, specs)| (*c, specs.as_slice())),
                &now,
                &self.config,
            )
        };

        let mut report = RebuildReport {
            skipped,
            failed_categories,
            ..Default::default()
        };

        for alarm in alarms {
            let id = alarm.wakeup_id();
            match schedule_best_effort(
                self.wakeups.as_ref(),
                alarm.trigger,
                &id,
                alarm.payload,
                alarm.rule,
            )
            .await
            {
                Ok(precision) => {
                    debug!("Scheduled {id} at {} ({precision:?})", alarm.trigger);
                    report.scheduled.push(alarm.reminder_id);
                }
                Err(e) => {
                    error!("Failed to schedule {id}: {e:?}");
                    report.failed.push(alarm.reminder_id);
                }
            }
        }

        info!(
            "Reminder rebuild finished: {} scheduled, {} skipped, {} failed",
            report.scheduled.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Records that a reminder's notification was shown.
    pub async fn acknowledge_delivery(&self, reminder_id: &str) -> Result<()> {
        self.store
            .mark_delivered(reminder_id)
            .await
            .inspect_err(|e| error!("Failed to mark {reminder_id} delivered: {e:?}"))
    }
}
