use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Set of weekdays a weekly reminder fires on. Stored as numbers 1..=7 where Sunday is 1,
/// which is also the encoding used on the wire. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeekdaySetError {
    Empty,
    OutOfRange(u8),
    UnknownName(String),
}

impl Display for WeekdaySetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeekdaySetError::Empty => write!(f, "weekday set can't be empty"),
            WeekdaySetError::OutOfRange(v) => {
                write!(f, "weekday {v} is outside of 1..=7 (Sunday = 1)")
            }
            WeekdaySetError::UnknownName(v) => write!(f, "unknown weekday '{v}'"),
        }
    }
}

impl std::error::Error for WeekdaySetError {}

impl WeekdaySet {
    pub fn from_numbers(
        numbers: impl IntoIterator<Item = u8>,
    ) -> Result<Self, WeekdaySetError> {
        let mut mask = 0u8;
        for n in numbers {
            if !(1..=7).contains(&n) {
                return Err(WeekdaySetError::OutOfRange(n));
            }
            mask |= 1 << (n - 1);
        }
        if mask == 0 {
            return Err(WeekdaySetError::Empty);
        }
        Ok(Self(mask))
    }

    pub fn from_weekdays(
        days: impl IntoIterator<Item = Weekday>,
    ) -> Result<Self, WeekdaySetError> {
        Self::from_numbers(days.into_iter().map(weekday_number))
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << (weekday_number(day) - 1)) != 0
    }

    /// Numbers in ascending order, Sunday first.
    pub fn numbers(&self) -> Vec<u8> {
        (1..=7).filter(|n| self.0 & (1 << (n - 1)) != 0).collect()
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl Display for WeekdaySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self
            .numbers()
            .into_iter()
            .map(|n| WEEKDAY_NAMES[(n - 1) as usize])
            .collect::<Vec<_>>();
        write!(f, "{}", names.join(","))
    }
}

fn weekday_number(day: Weekday) -> u8 {
    day.number_from_sunday() as u8
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = WeekdaySetError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_numbers(value)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(value: WeekdaySet) -> Self {
        value.numbers()
    }
}

/// Accepts a comma separated list of names (`mon,wed`) or numbers (`2,4`).
impl FromStr for WeekdaySet {
    type Err = WeekdaySetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut numbers = vec![];
        for part in s.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let number = match part.parse::<u8>() {
                Ok(v) => v,
                Err(_) => part
                    .parse::<Weekday>()
                    .map(weekday_number)
                    .map_err(|_| WeekdaySetError::UnknownName(part.to_owned()))?,
            };
            numbers.push(number);
        }
        Self::from_numbers(numbers)
    }
}

/// When a reminder should fire. Times are local wall-clock times of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReminderSchedule {
    #[serde(rename_all = "camelCase")]
    OneTime { notify_at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Daily { notify_time: NaiveTime },
    #[serde(rename_all = "camelCase")]
    Weekly {
        notify_time: NaiveTime,
        weekdays: WeekdaySet,
    },
}

/// Durable reminder record as served by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub schedule: ReminderSchedule,
    /// Device that authored the reminder. Only meaningful for shared reminders.
    #[serde(default)]
    pub origin_device_id: Option<String>,
    #[serde(default)]
    pub delivered: bool,
}

/// Source a reminder comes from. Each category is fetched and scheduled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReminderCategory {
    /// Reminders owned by this device's user.
    Personal,
    /// Reminders created on any device of the account and delivered everywhere.
    Shared,
}

impl Display for ReminderCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderCategory::Personal => write!(f, "personal"),
            ReminderCategory::Shared => write!(f, "shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::{WeekdaySet, WeekdaySetError};

    #[test]
    fn test_weekday_numbers_start_on_sunday() {
        let set = WeekdaySet::from_weekdays([Weekday::Sun, Weekday::Mon, Weekday::Sat]).unwrap();
        assert_eq!(set.numbers(), vec![1, 2, 7]);
        assert!(set.contains(Weekday::Sun));
        assert!(!set.contains(Weekday::Tue));
    }

    #[test]
    fn test_weekday_set_validation() {
        assert_eq!(
            WeekdaySet::from_numbers(Vec::<u8>::new()),
            Err(WeekdaySetError::Empty)
        );
        assert_eq!(
            WeekdaySet::from_numbers([0]),
            Err(WeekdaySetError::OutOfRange(0))
        );
        assert_eq!(
            WeekdaySet::from_numbers([8]),
            Err(WeekdaySetError::OutOfRange(8))
        );
    }

    #[test]
    fn test_weekday_set_parsing() {
        let set: WeekdaySet = "mon, wed".parse().unwrap();
        assert_eq!(set.numbers(), vec![2, 4]);
        let set: WeekdaySet = "1,7".parse().unwrap();
        assert_eq!(set.numbers(), vec![1, 7]);
        assert_eq!(set.to_string(), "sun,sat");
        assert!("funday".parse::<WeekdaySet>().is_err());
    }

    #[test]
    fn test_weekday_set_serde_rejects_empty() {
        assert!(serde_json::from_str::<WeekdaySet>("[]").is_err());
        let set: WeekdaySet = serde_json::from_str("[4, 2]").unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), "[2,4]");
    }
}
