//! Date arithmetic shared by the effect builders.
//!
//! Effect curves are sampled on a fixed grid aligned to multiples of the
//! effect delta since the Unix epoch, so curves built independently line up
//! timestamp for timestamp.

use chrono::{DateTime, Duration, Utc};

/// Length of a duration in fractional minutes
pub fn minutes(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}

/// Length of a duration in fractional hours
pub fn hours(duration: Duration) -> f64 {
    minutes(duration) / 60.0
}

/// Build a duration from fractional minutes, rounded to the millisecond
pub fn from_minutes(minutes: f64) -> Duration {
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

/// Round a date down onto the `interval` grid
pub fn floor_to_interval(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds();
    if step <= 0 {
        return date;
    }
    let remainder = date.timestamp_millis().rem_euclid(step);
    let sub_millis = i64::from(date.timestamp_subsec_nanos() % 1_000_000);
    date - Duration::milliseconds(remainder) - Duration::nanoseconds(sub_millis)
}

/// Round a date up onto the `interval` grid
pub fn ceil_to_interval(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let floored = floor_to_interval(date, interval);
    if floored == date {
        date
    } else {
        floored + interval
    }
}

/// Grid-aligned dates covering `[start, end]`, inclusive of both rounded ends
pub fn simulation_dates(start: DateTime<Utc>, end: DateTime<Utc>, delta: Duration) -> Vec<DateTime<Utc>> {
    let first = floor_to_interval(start, delta);
    let last = ceil_to_interval(end, delta);
    if delta <= Duration::zero() || last < first {
        return vec![first];
    }

    let mut dates = Vec::with_capacity(((last - first).num_milliseconds() / delta.num_milliseconds()) as usize + 1);
    let mut date = first;
    while date <= last {
        dates.push(date);
        date += delta;
    }
    dates
}

/// Serde adapter storing a `Duration` as fractional minutes
pub mod serde_minutes {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::minutes(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = f64::deserialize(deserializer)?;
        Ok(super::from_minutes(minutes))
    }
}

/// Serde adapter storing an optional `Duration` as fractional minutes
pub mod serde_minutes_option {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&super::minutes(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let minutes = Option::<f64>::deserialize(deserializer)?;
        Ok(minutes.map(super::from_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_floor_and_ceil_align_to_grid() {
        let delta = Duration::minutes(5);
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 30).unwrap();

        assert_eq!(
            floor_to_interval(date, delta),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap()
        );
        assert_eq!(
            ceil_to_interval(date, delta),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap()
        );
    }

    #[test]
    fn test_ceil_keeps_aligned_dates() {
        let delta = Duration::minutes(5);
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap();
        assert_eq!(ceil_to_interval(date, delta), date);
    }

    #[test]
    fn test_simulation_dates_inclusive() {
        let delta = Duration::minutes(5);
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 2, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 18, 0).unwrap();

        let dates = simulation_dates(start, end, delta);
        assert_eq!(dates.len(), 5); // 12:00 .. 12:20
        assert_eq!(dates[0], Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(dates[4], Utc.with_ymd_and_hms(2024, 3, 1, 12, 20, 0).unwrap());
    }

    #[test]
    fn test_minutes_roundtrip() {
        assert_eq!(minutes(from_minutes(37.5)), 37.5);
        assert_eq!(hours(Duration::minutes(90)), 1.5);
    }
}
