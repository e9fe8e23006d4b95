//! Insulin counteraction effects.
//!
//! Between consecutive glucose readings, the observed change minus the change
//! insulin alone should have produced is glucose movement the model does not
//! explain. Positive counteraction is the evidence carb absorption is built on.

use chrono::{DateTime, Duration, Utc};

use crate::time::minutes;
use crate::{GlucoseEffect, GlucoseEffectVelocity, GlucoseSample};

/// Readings closer together than this are folded into the next window
pub const MINIMUM_COUNTERACTION_WINDOW_MINUTES: i64 = 4;

/// Counteraction velocities over each window between glucose readings
///
/// `insulin_effects` must be sorted by timestamp. Windows that the effect
/// curve does not span are dropped.
pub fn counteraction_effects(glucose: &[GlucoseSample], insulin_effects: &[GlucoseEffect]) -> Vec<GlucoseEffectVelocity> {
    let mut velocities = Vec::new();
    let Some(mut start_glucose) = glucose.first() else {
        return velocities;
    };
    let minimum_window = Duration::minutes(MINIMUM_COUNTERACTION_WINDOW_MINUTES);

    for end_glucose in &glucose[1..] {
        let window = end_glucose.timestamp - start_glucose.timestamp;
        if window <= minimum_window {
            continue;
        }

        let (Some(start_effect), Some(end_effect)) = (
            effect_at_or_after(insulin_effects, start_glucose.timestamp),
            effect_at_or_after(insulin_effects, end_glucose.timestamp),
        ) else {
            break;
        };

        let glucose_change = end_glucose.value - start_glucose.value;
        let effect_change = end_effect.value - start_effect.value;
        let discrepancy = glucose_change - effect_change;

        velocities.push(GlucoseEffectVelocity {
            start: start_glucose.timestamp,
            end: end_glucose.timestamp,
            rate: discrepancy / minutes(window),
        });
        start_glucose = end_glucose;
    }

    tracing::debug!("Computed {} counteraction windows", velocities.len());
    velocities
}

fn effect_at_or_after(effects: &[GlucoseEffect], date: DateTime<Utc>) -> Option<&GlucoseEffect> {
    let index = effects.partition_point(|effect| effect.timestamp < date);
    effects.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn grid(values: &[f64]) -> Vec<GlucoseEffect> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| GlucoseEffect::new(t0() + Duration::minutes(5 * i as i64), *v))
            .collect()
    }

    #[test]
    fn test_subtracts_insulin_effect() {
        let glucose = vec![
            GlucoseSample::new(t0(), 100.0),
            GlucoseSample::new(t0() + Duration::minutes(5), 110.0),
            GlucoseSample::new(t0() + Duration::minutes(10), 115.0),
        ];
        let effects = grid(&[0.0, -5.0, -10.0]);

        let velocities = counteraction_effects(&glucose, &effects);
        assert_eq!(velocities.len(), 2);
        // +10 observed, -5 from insulin: 15 mg/dL unexplained over 5 minutes
        assert!((velocities[0].rate - 3.0).abs() < 1e-12);
        assert!((velocities[0].effect() - 15.0).abs() < 1e-9);
        assert!((velocities[1].rate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_close_readings_are_merged() {
        let glucose = vec![
            GlucoseSample::new(t0(), 100.0),
            GlucoseSample::new(t0() + Duration::minutes(2), 101.0),
            GlucoseSample::new(t0() + Duration::minutes(10), 110.0),
        ];
        let effects = grid(&[0.0, 0.0, 0.0]);

        let velocities = counteraction_effects(&glucose, &effects);
        assert_eq!(velocities.len(), 1);
        assert_eq!(velocities[0].start, t0());
        assert_eq!(velocities[0].end, t0() + Duration::minutes(10));
        assert!((velocities[0].rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stops_past_effect_curve() {
        let glucose = vec![
            GlucoseSample::new(t0(), 100.0),
            GlucoseSample::new(t0() + Duration::minutes(5), 105.0),
            GlucoseSample::new(t0() + Duration::minutes(30), 120.0),
        ];
        let effects = grid(&[0.0, 0.0]);

        assert_eq!(counteraction_effects(&glucose, &effects).len(), 1);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(counteraction_effects(&[], &grid(&[0.0])).is_empty());
        let glucose = vec![GlucoseSample::new(t0(), 100.0), GlucoseSample::new(t0() + Duration::minutes(5), 100.0)];
        assert!(counteraction_effects(&glucose, &[]).is_empty());
    }
}
