use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone};

/// Resolves a local wall-clock time on `date` into an instant of `tz`.
///
/// Ambiguous times (clocks turned back) resolve to the earlier instant. Times inside a gap
/// (clocks turned forward) move forward by the length of the gap, so 02:30 in a one hour gap
/// starting at 02:00 becomes 03:30.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    if let Some(v) = tz.from_local_datetime(&naive).earliest() {
        return v;
    }
    // Reading the wall time with the offset in force before the gap.
    let shifted = naive
        .checked_sub_signed(Duration::days(1))
        .map(|day_before| tz.offset_from_utc_datetime(&day_before).fix())
        .and_then(|before| {
            naive.checked_sub_signed(Duration::seconds(before.local_minus_utc().into()))
        });
    tz.from_utc_datetime(&shifted.unwrap_or(naive))
}

/// Parses durations like `90`, `90s`, `25m`, `1h30m` or `1h 5m 10s`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        bail!("Empty duration");
    }
    let too_long = || anyhow!("Duration {value} is too long");
    if let Ok(seconds) = value.parse::<i64>() {
        return Duration::try_seconds(seconds).ok_or_else(too_long);
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in value.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount = digits
            .parse::<i64>()
            .map_err(|_| anyhow!("Can't parse {value} into duration"))?;
        digits.clear();
        let part = match c {
            'h' => Duration::try_hours(amount),
            'm' => Duration::try_minutes(amount),
            's' => Duration::try_seconds(amount),
            _ => bail!("Unknown duration unit '{c}' in {value}"),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(too_long)?;
    }
    if !digits.is_empty() {
        bail!("Missing unit after {digits} in {value}");
    }
    Ok(total)
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
