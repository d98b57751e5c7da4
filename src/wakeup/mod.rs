//! Contract for the platform facility that wakes the device at a given instant.
//! [WakeupRegistrar] is the seam the timer and the reminder scheduler talk to;
//! [table::LocalWakeupTable] is the implementation used by the command line front end.

pub mod table;

use std::fmt::Display;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reminders::spec::WeekdaySet;

/// How precisely the platform should honor the trigger instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Precision {
    Exact,
    /// Battery friendly delivery, may be batched by the platform.
    Inexact,
}

/// What gets shown when the wake-up fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeupPayload {
    pub title: String,
    pub body: String,
}

/// Repetition handed to the platform for recurring reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecurrenceRule {
    Once,
    Daily { hour: u32, minute: u32 },
    Weekly {
        hour: u32,
        minute: u32,
        weekdays: WeekdaySet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeupError {
    /// The platform refused an exact alarm. Callers retry with [Precision::Inexact].
    ExactNotPermitted,
}

impl Display for WakeupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakeupError::ExactNotPermitted => write!(f, "exact wake-ups are not permitted"),
        }
    }
}

impl std::error::Error for WakeupError {}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WakeupRegistrar: Send + Sync + 'static {
    /// Registers a single wake-up. Registering an existing id replaces it.
    async fn schedule(
        &self,
        trigger: DateTime<Utc>,
        id: &str,
        payload: WakeupPayload,
        precision: Precision,
    ) -> Result<()>;

    async fn schedule_recurring(
        &self,
        first_trigger: DateTime<Utc>,
        id: &str,
        payload: WakeupPayload,
        rule: RecurrenceRule,
        precision: Precision,
    ) -> Result<()>;

    async fn cancel(&self, id: &str) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;

    /// Whether the user granted exact alarm scheduling.
    fn exact_permitted(&self) -> bool;
}

/// Schedules with the best precision available, falling back to an inexact wake-up when the
/// exact one is not allowed.
pub async fn schedule_best_effort(
    registrar: &dyn WakeupRegistrar,
    trigger: DateTime<Utc>,
    id: &str,
    payload: WakeupPayload,
    rule: RecurrenceRule,
) -> Result<Precision> {
    if registrar.exact_permitted() {
        let exact = register(
            registrar,
            trigger,
            id,
            payload.clone(),
            rule.clone(),
            Precision::Exact,
        )
        .await;
        match exact {
            Ok(()) => return Ok(Precision::Exact),
            Err(e)
                if matches!(
                    e.downcast_ref::<WakeupError>(),
                    Some(WakeupError::ExactNotPermitted)
                ) =>
            {
                tracing::warn!("Exact wake-up for {id} refused, degrading to inexact");
            }
            Err(e) => return Err(e),
        }
    } else {
        tracing::debug!("Exact wake-ups unavailable, scheduling {id} as inexact");
    }
    register(registrar, trigger, id, payload, rule, Precision::Inexact).await?;
    Ok(Precision::Inexact)
}

async fn register(
    registrar: &dyn WakeupRegistrar,
    trigger: DateTime<Utc>,
    id: &str,
    payload: WakeupPayload,
    rule: RecurrenceRule,
    precision: Precision,
) -> Result<()> {
    match rule {
        RecurrenceRule::Once => registrar.schedule(trigger, id, payload, precision).await,
        rule => {
            registrar
                .schedule_recurring(trigger, id, payload, rule, precision)
                .await
        }
    }
}
