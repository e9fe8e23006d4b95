//! Correction decision.
//!
//! A single pass over the forecast within one insulin effect duration of the
//! decision time classifies the dosing need. Any point under the suspend
//! threshold wins outright; otherwise the smallest positive correction across
//! all points is the candidate dose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::insulin::InsulinModel;
use crate::schedule::{ScheduleLookup, ScheduleSegment};
use crate::time::minutes;
use crate::{GlucoseRange, GlucoseSample};

/// Dosing need implied by a forecast
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsulinCorrection {
    /// No correction needed
    InRange,
    /// Eventual glucose is above range; `units` would bring `correcting` to target
    AboveRange {
        min_glucose: GlucoseSample,
        correcting: GlucoseSample,
        min_target: f64,
        units: f64,
    },
    /// Both the minimum and eventual glucose are under range; `units` is the
    /// magnitude of insulin to withhold
    EntirelyBelowRange {
        min_glucose: GlucoseSample,
        min_target: f64,
        units: f64,
    },
    /// A forecast point is under the suspend threshold
    Suspend { min_glucose: GlucoseSample },
}

impl InsulinCorrection {
    /// Signed correction: positive to add insulin, negative to withhold it
    pub fn units(&self) -> f64 {
        match self {
            InsulinCorrection::AboveRange { units, .. } => *units,
            InsulinCorrection::EntirelyBelowRange { units, .. } => -*units,
            InsulinCorrection::InRange | InsulinCorrection::Suspend { .. } => 0.0,
        }
    }

    /// Lowest forecast point considered, when the variant carries one
    pub fn min_glucose(&self) -> Option<&GlucoseSample> {
        match self {
            InsulinCorrection::AboveRange { min_glucose, .. }
            | InsulinCorrection::EntirelyBelowRange { min_glucose, .. }
            | InsulinCorrection::Suspend { min_glucose } => Some(min_glucose),
            InsulinCorrection::InRange => None,
        }
    }
}

/// Correction target for a point `percent_effect_duration` into the insulin
/// effect window
///
/// Holds `min_value` until `use_min_until_percent`, then moves linearly to
/// `max_value`, reached at the end of the window.
pub fn target_glucose_value(
    percent_effect_duration: f64,
    min_value: f64,
    max_value: f64,
    use_min_until_percent: f64,
) -> f64 {
    if percent_effect_duration <= use_min_until_percent {
        return min_value;
    }
    if percent_effect_duration >= 1.0 {
        return max_value;
    }
    let slope = (max_value - min_value) / (1.0 - use_min_until_percent);
    min_value + slope * (percent_effect_duration - use_min_until_percent)
}

/// Sensitivity weighted by the insulin effect falling in each schedule
/// segment between `date` and `until`
pub fn effected_sensitivity(
    sensitivity: &[ScheduleSegment<f64>],
    model: &dyn InsulinModel,
    date: DateTime<Utc>,
    until: DateTime<Utc>,
) -> f64 {
    sensitivity
        .overlapping(date, until)
        .into_iter()
        .map(|(start, end, isf)| {
            let effected = model.percent_effect_remaining(start - date) - model.percent_effect_remaining(end - date);
            effected * isf
        })
        .sum()
}

/// Classify `prediction` for a dose decided at `date`
///
/// # Panics
/// When `prediction` or `targets` is empty.
pub fn insulin_correction(
    prediction: &[GlucoseSample],
    date: DateTime<Utc>,
    targets: &[ScheduleSegment<GlucoseRange>],
    suspend_threshold: f64,
    sensitivity: &[ScheduleSegment<f64>],
    model: &dyn InsulinModel,
    use_min_until_percent: f64,
) -> InsulinCorrection {
    assert!(!prediction.is_empty(), "correction requires a non-empty prediction");
    assert!(!targets.is_empty(), "correction requires a target schedule");

    let effect_duration = model.effect_duration();
    let window_end = date + effect_duration;

    let mut min_glucose: Option<GlucoseSample> = None;
    let mut eventual_glucose: Option<GlucoseSample> = None;
    let mut correcting: Option<(GlucoseSample, f64)> = None;
    let mut sensitivity_at_min = 0.0;

    for point in prediction {
        if point.timestamp < date || point.timestamp > window_end {
            continue;
        }
        if point.value < suspend_threshold {
            tracing::info!("Forecast {:.0} mg/dL at {} is below suspend threshold", point.value, point.timestamp);
            return InsulinCorrection::Suspend { min_glucose: *point };
        }
        let Some(range) = targets.value_at(point.timestamp) else {
            continue;
        };

        let sensitivity_now = effected_sensitivity(sensitivity, model, date, point.timestamp);
        if min_glucose.map_or(true, |min| point.value < min.value) {
            min_glucose = Some(*point);
            sensitivity_at_min = sensitivity_now;
        }
        eventual_glucose = Some(*point);

        let percent = minutes(point.timestamp - date) / minutes(effect_duration);
        let target = target_glucose_value(percent, suspend_threshold, range.average(), use_min_until_percent);
        let units = (point.value - target) / sensitivity_now.max(f64::EPSILON);
        if units > 0.0 && correcting.map_or(true, |(_, min_units)| units < min_units) {
            correcting = Some((*point, units));
        }
    }

    let (Some(min_glucose), Some(eventual_glucose)) = (min_glucose, eventual_glucose) else {
        tracing::warn!("No forecast points within the insulin effect window after {}", date);
        return InsulinCorrection::InRange;
    };
    let (Some(min_targets), Some(eventual_targets)) = (
        targets.value_at(min_glucose.timestamp).copied(),
        targets.value_at(eventual_glucose.timestamp).copied(),
    ) else {
        return InsulinCorrection::InRange;
    };

    if min_glucose.value < min_targets.min && eventual_glucose.value < eventual_targets.min {
        let units = (min_targets.average() - min_glucose.value) / sensitivity_at_min.max(f64::EPSILON);
        return InsulinCorrection::EntirelyBelowRange {
            min_glucose,
            min_target: min_targets.min,
            units,
        };
    }

    match correcting {
        Some((correcting, units)) if eventual_glucose.value > eventual_targets.max => InsulinCorrection::AboveRange {
            min_glucose,
            correcting,
            min_target: eventual_targets.min,
            units,
        },
        _ => InsulinCorrection::InRange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insulin::InsulinModelPreset;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn flat<T>(value: T) -> Vec<ScheduleSegment<T>> {
        vec![ScheduleSegment::new(t0() - Duration::hours(24), None, value)]
    }

    fn forecast(value_at: impl Fn(i64) -> f64) -> Vec<GlucoseSample> {
        (0..=74)
            .map(|i| GlucoseSample::new(t0() + Duration::minutes(5 * i), value_at(5 * i)))
            .collect()
    }

    fn correct(prediction: &[GlucoseSample]) -> InsulinCorrection {
        insulin_correction(
            prediction,
            t0(),
            &flat(GlucoseRange::new(100.0, 120.0)),
            70.0,
            &flat(50.0),
            &InsulinModelPreset::RapidActingAdult,
            0.5,
        )
    }

    #[test]
    fn test_target_blend() {
        assert_eq!(target_glucose_value(0.2, 70.0, 110.0, 0.5), 70.0);
        assert_eq!(target_glucose_value(0.5, 70.0, 110.0, 0.5), 70.0);
        assert!((target_glucose_value(0.75, 70.0, 110.0, 0.5) - 90.0).abs() < 1e-12);
        assert_eq!(target_glucose_value(1.2, 70.0, 110.0, 0.5), 110.0);
    }

    #[test]
    fn test_effected_sensitivity_full_window() {
        let model = InsulinModelPreset::RapidActingAdult;
        let full = effected_sensitivity(&flat(50.0), &model, t0(), t0() + Duration::minutes(370));
        assert!((full - 50.0).abs() < 1e-12);
        assert_eq!(effected_sensitivity(&flat(50.0), &model, t0(), t0()), 0.0);
    }

    #[test]
    fn test_effected_sensitivity_split_schedule() {
        let model = InsulinModelPreset::RapidActingAdult;
        let isf = vec![
            ScheduleSegment::new(t0() - Duration::hours(1), Some(t0() + Duration::hours(2)), 40.0),
            ScheduleSegment::new(t0() + Duration::hours(2), None, 80.0),
        ];
        let value = effected_sensitivity(&isf, &model, t0(), t0() + Duration::minutes(370));
        assert!(value > 40.0 && value < 80.0);
    }

    #[test]
    fn test_above_range() {
        let correction = correct(&forecast(|_| 150.0));
        match correction {
            InsulinCorrection::AboveRange { units, correcting, .. } => {
                // Eventual point: (150 - 110) / 50
                assert!((units - 0.8).abs() < 1e-9, "units {}", units);
                assert_eq!(correcting.timestamp, t0() + Duration::minutes(370));
            }
            other => panic!("expected above range, got {:?}", other),
        }
    }

    #[test]
    fn test_suspend_wins_over_everything() {
        let correction = correct(&forecast(|m| if m == 120 { 65.0 } else { 250.0 }));
        match correction {
            InsulinCorrection::Suspend { min_glucose } => assert_eq!(min_glucose.value, 65.0),
            other => panic!("expected suspend, got {:?}", other),
        }
    }

    #[test]
    fn test_in_range() {
        assert_eq!(correct(&forecast(|_| 110.0)), InsulinCorrection::InRange);
    }

    #[test]
    fn test_entirely_below_range() {
        let correction = correct(&forecast(|m| 95.0 - m as f64 / 370.0 * 10.0));
        match &correction {
            InsulinCorrection::EntirelyBelowRange { min_target, units, .. } => {
                assert_eq!(*min_target, 100.0);
                assert!(*units > 0.0);
                assert!(correction.units() < 0.0);
            }
            other => panic!("expected entirely below range, got {:?}", other),
        }
    }

    #[test]
    fn test_ignores_points_outside_window() {
        let mut prediction = forecast(|_| 110.0);
        prediction.insert(0, GlucoseSample::new(t0() - Duration::minutes(5), 40.0));
        prediction.push(GlucoseSample::new(t0() + Duration::minutes(400), 40.0));
        assert_eq!(correct(&prediction), InsulinCorrection::InRange);
    }

    #[test]
    #[should_panic(expected = "non-empty prediction")]
    fn test_empty_prediction_panics() {
        correct(&[]);
    }
}
