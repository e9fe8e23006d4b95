//! Pre-resolved therapy schedules.
//!
//! Schedules arrive as sorted, non-overlapping segment lists (basal rates,
//! sensitivities, carb ratios, target ranges). Lookups binary-search the
//! ordered slice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-bounded value of a schedule
///
/// A segment without an explicit end runs until the next segment starts, or
/// indefinitely when it is the last one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSegment<T> {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub value: T,
}

impl<T> ScheduleSegment<T> {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>, value: T) -> Self {
        Self { start, end, value }
    }
}

/// Lookups over an ordered schedule slice
pub trait ScheduleLookup<T> {
    /// Index of the segment in effect at `date`
    ///
    /// Falls back to the closest prior segment when `date` lands in a gap, and
    /// to the first segment when `date` precedes the schedule.
    fn index_at(&self, date: DateTime<Utc>) -> Option<usize>;

    /// Value in effect at `date`
    fn value_at(&self, date: DateTime<Utc>) -> Option<&T>;

    /// Segments overlapping `[start, end)`, clipped to that window
    fn overlapping(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>, &T)>;

    /// True when the schedule starts at or before `date`
    fn covers_from(&self, date: DateTime<Utc>) -> bool;
}

impl<T> ScheduleLookup<T> for [ScheduleSegment<T>] {
    fn index_at(&self, date: DateTime<Utc>) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let after = self.partition_point(|segment| segment.start <= date);
        Some(after.saturating_sub(1))
    }

    fn value_at(&self, date: DateTime<Utc>) -> Option<&T> {
        self.index_at(date).map(|index| &self[index].value)
    }

    fn overlapping(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>, &T)> {
        let mut windows = Vec::new();
        let Some(first) = self.index_at(start) else {
            return windows;
        };

        for index in first..self.len() {
            let segment = &self[index];
            // The first segment doubles as fallback for dates before the schedule
            let segment_start = if index == first { start } else { segment.start };
            if segment_start >= end {
                break;
            }

            let segment_end = effective_end(self, index).map_or(end, |e| e.min(end));
            let window_start = segment_start.max(start);
            if segment_end > window_start {
                windows.push((window_start, segment_end, &segment.value));
            }
        }

        windows
    }

    fn covers_from(&self, date: DateTime<Utc>) -> bool {
        self.first().is_some_and(|segment| segment.start <= date)
    }
}

/// End of a segment: its explicit end, else the start of the next segment
fn effective_end<T>(segments: &[ScheduleSegment<T>], index: usize) -> Option<DateTime<Utc>> {
    segments[index]
        .end
        .or_else(|| segments.get(index + 1).map(|next| next.start))
}
