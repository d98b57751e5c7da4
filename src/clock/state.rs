//! Pure timer state machine. Every transition takes the current wall-clock time as an
//! argument; elapsed time is always `now - start_anchor`, never a sum of ticks.
//!
//! ```text
//! Idle -> Running <-> Paused
//!         Running -> Fired -> (Idle | Running)
//!         Running | Paused -> Idle
//! ```

use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    #[default]
    CountUp,
    CountDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    /// A workout or other tracked activity; location samples are collected for it.
    Activity,
    Timer,
    Stopwatch,
}

/// The activity currently being timed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub label: String,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Fired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    SessionActive,
    NotRunning,
    NotPaused,
    NotFired,
    InvalidDuration,
}

impl Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::SessionActive => write!(f, "a session is already active"),
            ClockError::NotRunning => write!(f, "timer is not running"),
            ClockError::NotPaused => write!(f, "timer is not paused"),
            ClockError::NotFired => write!(f, "timer has not finished"),
            ClockError::InvalidDuration => {
                write!(f, "count-down duration must be positive and end in a representable time")
            }
        }
    }
}

impl std::error::Error for ClockError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is running, the tick is a no-op.
    Stopped,
    Running {
        elapsed: Duration,
        remaining: Option<Duration>,
    },
    /// The count-down just reached its end. Returned exactly once per run.
    Fired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub mode: TimerMode,
    /// Wall-clock instant the current run segment started from.
    pub start_anchor: Option<DateTime<Utc>>,
    /// Value shown when the timer was paused: elapsed for count-up, remaining for count-down.
    #[serde(with = "millis_opt", default)]
    pub frozen_remainder: Option<Duration>,
    #[serde(with = "millis", default = "Duration::zero")]
    pub total_duration: Duration,
    pub running: bool,
    pub paused: bool,
    pub alarm_fired: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            mode: TimerMode::CountUp,
            start_anchor: None,
            frozen_remainder: None,
            total_duration: Duration::zero(),
            running: false,
            paused: false,
            alarm_fired: false,
        }
    }
}

impl TimerState {
    pub fn phase(&self) -> TimerPhase {
        if self.running {
            TimerPhase::Running
        } else if self.paused {
            TimerPhase::Paused
        } else if self.alarm_fired {
            TimerPhase::Fired
        } else {
            TimerPhase::Idle
        }
    }

    /// Rejects count-downs that are empty or would end outside the range of [DateTime].
    pub fn check_count_down(
        total_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ClockError> {
        if total_duration <= Duration::zero() {
            return Err(ClockError::InvalidDuration);
        }
        // Resume moves the anchor back by up to the whole duration.
        now.checked_sub_signed(total_duration)
            .and(now.checked_add_signed(total_duration))
            .ok_or(ClockError::InvalidDuration)
    }

    pub fn start(&mut self, mode: TimerMode, total_duration: Duration, now: DateTime<Utc>) {
        *self = Self {
            mode,
            start_anchor: Some(now),
            frozen_remainder: None,
            total_duration,
            running: true,
            paused: false,
            alarm_fired: false,
        };
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.phase() {
            TimerPhase::Running => self
                .start_anchor
                .map(|anchor| (now - anchor).max(Duration::zero()))
                .unwrap_or_else(Duration::zero),
            TimerPhase::Paused => self.elapsed_at_pause(),
            TimerPhase::Fired => self.total_duration,
            TimerPhase::Idle => Duration::zero(),
        }
    }

    /// Time left on a count-down, `None` for count-up.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.mode {
            TimerMode::CountUp => None,
            TimerMode::CountDown => {
                Some((self.total_duration - self.elapsed(now)).max(Duration::zero()))
            }
        }
    }

    /// What a timer face shows: elapsed for count-up, remaining for count-down.
    pub fn displayed(&self, now: DateTime<Utc>) -> Duration {
        self.remaining(now).unwrap_or_else(|| self.elapsed(now))
    }

    /// Instant a running count-down ends at.
    pub fn fires_at(&self) -> Option<DateTime<Utc>> {
        match (self.mode, self.running, self.start_anchor) {
            (TimerMode::CountDown, true, Some(anchor)) => {
                anchor.checked_add_signed(self.total_duration)
            }
            _ => None,
        }
    }

    fn elapsed_at_pause(&self) -> Duration {
        let frozen = self.frozen_remainder.unwrap_or_else(Duration::zero);
        match self.mode {
            TimerMode::CountUp => frozen,
            TimerMode::CountDown => self.total_duration - frozen,
        }
    }

    /// Returns `Ok(false)` when the timer was already paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<bool, ClockError> {
        if self.paused {
            return Ok(false);
        }
        if !self.running {
            return Err(ClockError::NotRunning);
        }
        // Same precision as the checkpoint, so a reloaded state compares equal.
        let shown = self.displayed(now).num_milliseconds();
        self.frozen_remainder = Some(Duration::milliseconds(shown));
        self.start_anchor = None;
        self.running = false;
        self.paused = true;
        Ok(true)
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), ClockError> {
        if !self.paused {
            return Err(ClockError::NotPaused);
        }
        let anchor = now
            .checked_sub_signed(self.elapsed_at_pause())
            .ok_or(ClockError::InvalidDuration)?;
        self.start_anchor = Some(anchor);
        self.frozen_remainder = None;
        self.running = true;
        self.paused = false;
        Ok(())
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if !self.running {
            return TickOutcome::Stopped;
        }
        let elapsed = self.elapsed(now);
        if self.mode == TimerMode::CountDown && elapsed >= self.total_duration {
            self.running = false;
            self.start_anchor = None;
            self.alarm_fired = true;
            return TickOutcome::Fired;
        }
        TickOutcome::Running {
            elapsed,
            remaining: self.remaining(now),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Checks the invariants a freshly loaded state must hold. The message names the first
    /// violated one.
    pub fn check(&self, has_session: bool) -> Result<(), &'static str> {
        let phase = self.phase();
        if self.running && self.paused {
            return Err("running and paused at the same time");
        }
        if self.alarm_fired && (self.running || self.paused) {
            return Err("alarm fired while still active");
        }
        if self.running && self.start_anchor.is_none() {
            return Err("running without an anchor");
        }
        if self.paused && self.frozen_remainder.is_none() {
            return Err("paused without a frozen value");
        }
        if self.paused && self.start_anchor.is_some() {
            return Err("paused with a live anchor");
        }
        if self.mode == TimerMode::CountDown
            && phase != TimerPhase::Idle
            && self.total_duration <= Duration::zero()
        {
            return Err("count-down without a duration");
        }
        if self.mode == TimerMode::CountDown && self.running && self.fires_at().is_none() {
            return Err("count-down ends out of range");
        }
        if let Some(frozen) = self.frozen_remainder {
            if frozen < Duration::zero()
                || (self.mode == TimerMode::CountDown && frozen > self.total_duration)
            {
                return Err("frozen value out of range");
            }
        }
        if phase != TimerPhase::Idle && !has_session {
            return Err("active timer without a session");
        }
        Ok(())
    }
}

mod millis {
    use chrono::Duration;
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = i64::deserialize(deserializer)?;
        Duration::try_milliseconds(ms).ok_or_else(|| D::Error::custom("duration out of range"))
    }
}

mod millis_opt {
    use chrono::Duration;
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(v) => serializer.serialize_some(&v.num_milliseconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<i64>::deserialize(deserializer)? {
            Some(ms) => Duration::try_milliseconds(ms)
                .map(Some)
                .ok_or_else(|| D::Error::custom("duration out of range")),
            None => Ok(None),
        }
    }
}
