//! Side-effect free trigger arithmetic. Everything here is a function of its arguments only,
//! the scheduler feeds it the current time and the device time zone.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc};

use crate::utils::time::resolve_local;

use super::spec::WeekdaySet;

/// A one-time reminder fires at its stored instant, or never if that instant already passed.
pub fn next_one_time(target: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (target > now).then_some(target)
}

/// Today at `time` if that is still ahead of `now`, tomorrow at `time` otherwise.
pub fn next_daily<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = resolve_local(&tz, today, time);
    if candidate > *now {
        return candidate;
    }
    let tomorrow = today + Days::new(1);
    resolve_local(&tz, tomorrow, time)
}

/// Earliest day of `weekdays` whose `time` is still ahead of `now`. Today counts when the time
/// hasn't passed yet, otherwise the scan continues up to the same weekday next week.
pub fn next_weekly<Tz: TimeZone>(
    now: &DateTime<Tz>,
    time: NaiveTime,
    weekdays: &WeekdaySet,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();
    (0..=7u64)
        .map(|offset| today + Days::new(offset))
        .filter(|date| weekdays.contains(date.weekday()))
        .map(|date| resolve_local(&tz, date, time))
        .find(|candidate| candidate > now)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};

    use crate::{reminders::spec::WeekdaySet, utils::time::testing::SummerTime};

    use super::{next_daily, next_one_time, next_weekly};

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-05-06 is a Monday.
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, 0).unwrap()
    }

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn test_one_time_future_and_past() {
        assert_eq!(next_one_time(at(7, 9, 0), at(7, 8, 0)), Some(at(7, 9, 0)));
        assert_eq!(next_one_time(at(7, 9, 0), at(7, 10, 0)), None);
        assert_eq!(next_one_time(at(7, 9, 0), at(7, 9, 0)), None);
    }

    #[test]
    fn test_daily_before_and_after_slot() {
        assert_eq!(next_daily(&at(7, 7, 0), time(8, 0)), at(7, 8, 0));
        assert_eq!(next_daily(&at(7, 9, 0), time(8, 0)), at(8, 8, 0));
    }

    #[test]
    fn test_daily_exactly_at_slot_moves_to_tomorrow() {
        assert_eq!(next_daily(&at(7, 8, 0), time(8, 0)), at(8, 8, 0));
    }

    #[test]
    fn test_daily_crosses_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 23, 30, 0).unwrap();
        assert_eq!(
            next_daily(&now, time(6, 15)),
            Utc.with_ymd_and_hms(2024, 6, 1, 6, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_weekly_later_this_week() {
        let days = WeekdaySet::from_weekdays([Weekday::Mon, Weekday::Wed]).unwrap();
        // Tuesday 10:00
        assert_eq!(
            next_weekly(&at(7, 10, 0), time(9, 0), &days),
            Some(at(8, 9, 0))
        );
    }

    #[test]
    fn test_weekly_today_slot_passed_goes_to_next_week() {
        let days = WeekdaySet::from_weekdays([Weekday::Mon]).unwrap();
        // Monday 10:00
        assert_eq!(
            next_weekly(&at(6, 10, 0), time(9, 0), &days),
            Some(at(13, 9, 0))
        );
    }

    #[test]
    fn test_weekly_today_slot_still_ahead() {
        let days = WeekdaySet::from_weekdays([Weekday::Mon]).unwrap();
        assert_eq!(
            next_weekly(&at(6, 8, 0), time(9, 0), &days),
            Some(at(6, 9, 0))
        );
    }

    #[test]
    fn test_weekly_wraps_over_weekend() {
        let days = WeekdaySet::from_weekdays([Weekday::Sun]).unwrap();
        // Saturday 2024-05-11 -> Sunday 2024-05-12
        assert_eq!(
            next_weekly(&at(11, 22, 0), time(7, 30), &days),
            Some(at(12, 7, 30))
        );
    }

    #[test]
    fn test_weekly_uses_local_weekday() {
        // 23:30 UTC on Monday is already Tuesday 01:30 at UTC+2.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = at(6, 23, 30).with_timezone(&tz);
        let days = WeekdaySet::from_weekdays([Weekday::Tue]).unwrap();
        let next = next_weekly(&now, time(9, 0), &days).unwrap();
        assert_eq!(next.with_timezone(&Utc), at(7, 7, 0));
    }

    #[test]
    fn test_daily_slot_inside_spring_gap() {
        // Saturday evening before the clocks go forward at 02:00 local.
        let now = Utc
            .with_ymd_and_hms(2024, 3, 30, 21, 0, 0)
            .unwrap()
            .with_timezone(&SummerTime);
        let next = next_daily(&now, time(2, 30));
        assert_eq!(next.naive_local().time(), time(3, 30));
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_slot_repeated_in_autumn() {
        let now = Utc
            .with_ymd_and_hms(2024, 10, 26, 21, 0, 0)
            .unwrap()
            .with_timezone(&SummerTime);
        assert_eq!(
            next_daily(&now, time(2, 30)).with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_weekly_keeps_wall_time_across_the_change() {
        let days = WeekdaySet::from_weekdays([Weekday::Mon]).unwrap();
        // Monday 25 March 10:00 local, winter time.
        let now = Utc
            .with_ymd_and_hms(2024, 3, 25, 9, 0, 0)
            .unwrap()
            .with_timezone(&SummerTime);
        let next = next_weekly(&now, time(9, 0), &days).unwrap();
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 4, 1, 7, 0, 0).unwrap()
        );
    }
}
