//! Property tests for the correction decision and dose translation.

use chrono::{DateTime, Duration, TimeZone, Utc};
use loop_core::correction::insulin_correction;
use loop_core::dosing::round_down;
use loop_core::types::TempBasalRecommendation;
use loop_core::{
    predict_glucose, DoseEntry, GlucoseEffect, GlucoseRange, GlucoseSample, InsulinCorrection, InsulinModel,
    InsulinModelPreset, ScheduleSegment,
};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn forecast(values: &[f64]) -> Vec<GlucoseSample> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| GlucoseSample::new(t0() + Duration::minutes(5 * i as i64), *value))
        .collect()
}

fn correct(values: &[f64], suspend_threshold: f64) -> InsulinCorrection {
    let targets = vec![ScheduleSegment::new(t0() - Duration::days(1), None, GlucoseRange::new(100.0, 120.0))];
    let sensitivity = vec![ScheduleSegment::new(t0() - Duration::days(1), None, 50.0)];
    insulin_correction(
        &forecast(values),
        t0(),
        &targets,
        suspend_threshold,
        &sensitivity,
        &InsulinModelPreset::RapidActingAdult,
        0.5,
    )
}

fn identity(value: f64) -> f64 {
    value
}

// ── Correction decision ──────────────────────────────────────

proptest! {
    /// Any forecast point under the suspend threshold inside the effect
    /// window forces a suspend, whatever the rest of the curve looks like.
    #[test]
    fn low_point_always_suspends(
        values in proptest::collection::vec(40.0f64..400.0, 1..=70),
        threshold in 60.0f64..90.0,
    ) {
        let correction = correct(&values, threshold);
        let has_low = values.iter().any(|value| *value < threshold);
        prop_assert_eq!(has_low, matches!(correction, InsulinCorrection::Suspend { .. }));
    }

    #[test]
    fn stored_units_are_magnitudes(
        values in proptest::collection::vec(40.0f64..400.0, 1..=70),
    ) {
        match correct(&values, 70.0) {
            InsulinCorrection::AboveRange { units, .. } => prop_assert!(units >= 0.0),
            InsulinCorrection::EntirelyBelowRange { units, .. } => prop_assert!(units >= 0.0),
            InsulinCorrection::InRange | InsulinCorrection::Suspend { .. } => {}
        }
    }

    /// A flat curve above the threshold never suspends and never withholds
    #[test]
    fn flat_forecast_classification(value in 70.0f64..400.0, len in 1usize..=70) {
        let correction = correct(&vec![value; len], 70.0);
        if value > 120.0 {
            let is_above = matches!(correction, InsulinCorrection::AboveRange { .. });
            prop_assert!(is_above);
        } else if value >= 100.0 {
            prop_assert_eq!(correction, InsulinCorrection::InRange);
        } else {
            let is_below = matches!(correction, InsulinCorrection::EntirelyBelowRange { .. });
            prop_assert!(is_below);
        }
    }
}

// ── Dose translation ─────────────────────────────────────────

proptest! {
    #[test]
    fn temp_basal_within_limits(
        values in proptest::collection::vec(40.0f64..400.0, 1..=70),
        scheduled in 0.0f64..3.0,
        max_rate in 0.0f64..6.0,
        increment in prop_oneof![Just(None), Just(Some(0.05)), Just(Some(0.1))],
        duration in prop_oneof![Just(0i64), 1i64..=60],
    ) {
        let correction = correct(&values, 70.0);
        let rounder = |rate: f64| round_down(rate, increment);
        let recommendation = correction.as_temp_basal(scheduled, max_rate, Duration::minutes(duration), &rounder);

        let rate = recommendation.units_per_hour().unwrap_or(f64::NAN);
        prop_assert!((0.0..=max_rate).contains(&rate), "rate {} max {}", rate, max_rate);
    }

    #[test]
    fn manual_bolus_within_limits(
        values in proptest::collection::vec(40.0f64..400.0, 1..=70),
        max_bolus in 0.0f64..10.0,
    ) {
        let correction = correct(&values, 70.0);
        let rounder = |units: f64| round_down(units, Some(0.05));
        let bolus = correction.as_manual_bolus(max_bolus, &rounder, None, None);
        prop_assert!(bolus.amount >= 0.0 && bolus.amount <= max_bolus);
    }

    /// With no scaling and no cap the partial bolus is the positive correction
    #[test]
    fn full_partial_bolus_matches_units(value in 70.0f64..400.0) {
        let correction = correct(&[value], 70.0);
        let bolus = correction.as_partial_bolus(1.0, f64::INFINITY, &identity);
        prop_assert!((bolus - correction.units().max(0.0)).abs() < 1e-12);
    }

    #[test]
    fn if_necessary_is_idempotent(
        rate in 0.0f64..4.0,
        scheduled in prop_oneof![Just(1.0f64), 0.0f64..4.0],
        remaining in 0i64..30,
        running in any::<bool>(),
    ) {
        let now = t0();
        let last = DoseEntry::temp_basal(now - Duration::minutes(5), now + Duration::minutes(remaining), 1.0);
        let last = running.then_some(&last);
        let continuation = Duration::minutes(11);

        let candidate = TempBasalRecommendation::new(rate, Duration::minutes(30));
        let first = candidate.if_necessary(now, scheduled, last, continuation, true);
        let second = candidate.if_necessary(now, scheduled, last, continuation, true);
        prop_assert_eq!(first, second);

        // Re-submitting a command that went out is never turned into something else
        if let Some(recommendation) = first {
            let resubmitted = recommendation.if_necessary(now, scheduled, last, continuation, true);
            prop_assert_eq!(resubmitted, Some(recommendation));
        }
    }
}

// ── Forecast combination ─────────────────────────────────────

proptest! {
    /// A curve whose points never change leaves the forecast flat
    #[test]
    fn constant_effect_keeps_forecast_flat(start in 40.0f64..400.0, level in -50.0f64..50.0, len in 1usize..=80) {
        let effect: Vec<GlucoseEffect> = (0..len)
            .map(|i| GlucoseEffect::new(t0() + Duration::minutes(5 * i as i64), level))
            .collect();
        let prediction = predict_glucose(&GlucoseSample::new(t0(), start), &[], &[effect.as_slice()]);

        prop_assert_eq!(prediction.len(), len);
        prop_assert!(prediction.iter().all(|point| (point.value - start).abs() < 1e-9));
    }
}

#[test]
fn effect_window_spans_model_duration() {
    let model = InsulinModelPreset::RapidActingAdult;
    assert_eq!(model.effect_duration(), Duration::minutes(370));
}
