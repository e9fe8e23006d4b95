//! Retrospective correction.
//!
//! The discrepancy between observed counteraction and what the carb model
//! explains is summed into overlapping buckets. The newest bucket, if recent
//! enough, is turned into a decaying glucose effect that nudges the forecast
//! toward what has actually been happening.

use chrono::{DateTime, Duration, Utc};

use crate::config::RetrospectiveSettings;
use crate::time::{floor_to_interval, from_minutes, minutes};
use crate::{GlucoseChange, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, RetrospectiveCorrectionKind};

/// Discrepancies smaller than this break the integral run
const MINIMUM_DISCREPANCY: f64 = 0.1;

/// A correction strategy turning summed discrepancies into an effect curve
pub trait RetrospectiveCorrection {
    /// Build the correction effect starting at the latest glucose
    ///
    /// Returns an all-zero curve when the newest bucket ends more than
    /// `recency_interval` before `latest_glucose`.
    fn compute_effect(
        &self,
        latest_glucose: &GlucoseSample,
        discrepancies_summed: &[GlucoseChange],
        recency_interval: Duration,
        grouping_interval: Duration,
    ) -> Vec<GlucoseEffect>;
}

/// Constant-velocity correction decayed linearly over a fixed duration
#[derive(Clone, Debug)]
pub struct StandardRetrospectiveCorrection {
    pub effect_duration: Duration,
    pub delta: Duration,
}

impl RetrospectiveCorrection for StandardRetrospectiveCorrection {
    fn compute_effect(
        &self,
        latest_glucose: &GlucoseSample,
        discrepancies_summed: &[GlucoseChange],
        recency_interval: Duration,
        grouping_interval: Duration,
    ) -> Vec<GlucoseEffect> {
        let Some(current) = recent_discrepancy(latest_glucose, discrepancies_summed, recency_interval) else {
            return decay_effect(latest_glucose.timestamp, 0.0, self.effect_duration, self.delta);
        };

        let velocity = current.value / discrepancy_minutes(current, grouping_interval);
        tracing::debug!(
            "Standard retrospective correction: discrepancy {:.2} mg/dL, velocity {:.3} mg/dL/min",
            current.value,
            velocity
        );
        decay_effect(latest_glucose.timestamp, velocity, self.effect_duration, self.delta)
    }
}

/// Proportional-integral-differential correction over contiguous same-sign
/// discrepancies
#[derive(Clone, Debug)]
pub struct IntegralRetrospectiveCorrection {
    pub effect_duration: Duration,
    pub maximum_effect_duration: Duration,
    pub delta: Duration,
    pub grouping_interval_multiplier: f64,
    pub current_discrepancy_gain: f64,
    pub persistent_discrepancy_gain: f64,
    pub correction_time_constant: Duration,
    pub differential_gain: f64,
}

impl IntegralRetrospectiveCorrection {
    fn from_settings(settings: &RetrospectiveSettings, delta: Duration) -> Self {
        Self {
            effect_duration: settings.effect_duration,
            maximum_effect_duration: settings.maximum_correction_effect_duration,
            delta,
            grouping_interval_multiplier: settings.grouping_interval_multiplier,
            current_discrepancy_gain: settings.current_discrepancy_gain,
            persistent_discrepancy_gain: settings.persistent_discrepancy_gain,
            correction_time_constant: settings.correction_time_constant,
            differential_gain: settings.differential_gain,
        }
    }

    /// Same-sign discrepancies ending at the current one, oldest first
    fn contiguous_run(&self, discrepancies: &[GlucoseChange], grouping_interval: Duration) -> Vec<f64> {
        let Some(current) = discrepancies.last() else {
            return Vec::new();
        };
        let max_gap = minutes(grouping_interval) * self.grouping_interval_multiplier;
        let positive = current.value > 0.0;

        let mut run = Vec::new();
        let mut next_end = current.end;
        for past in discrepancies.iter().rev() {
            let same_sign = (past.value > 0.0) == positive;
            let contiguous = minutes(next_end - past.end) <= max_gap;
            if !same_sign || !contiguous || past.value.abs() < MINIMUM_DISCREPANCY {
                break;
            }
            run.push(past.value);
            next_end = past.end;
        }
        run.reverse();
        run
    }
}

impl RetrospectiveCorrection for IntegralRetrospectiveCorrection {
    fn compute_effect(
        &self,
        latest_glucose: &GlucoseSample,
        discrepancies_summed: &[GlucoseChange],
        recency_interval: Duration,
        grouping_interval: Duration,
    ) -> Vec<GlucoseEffect> {
        let Some(current) = recent_discrepancy(latest_glucose, discrepancies_summed, recency_interval) else {
            return decay_effect(latest_glucose.timestamp, 0.0, self.effect_duration, self.delta);
        };

        let step = minutes(self.delta);
        let forget = (-step / minutes(self.correction_time_constant)).exp();
        let integral_gain =
            ((1.0 - forget) / forget) * (self.persistent_discrepancy_gain - self.current_discrepancy_gain);
        let proportional_gain = self.current_discrepancy_gain - integral_gain;

        let run = self.contiguous_run(discrepancies_summed, grouping_interval);
        let mut integral = 0.0;
        let mut effect_minutes = minutes(self.effect_duration) - 2.0 * step;
        for discrepancy in &run {
            integral = forget * integral + integral_gain * discrepancy;
            effect_minutes += 2.0 * step;
        }
        let effect_minutes = effect_minutes
            .max(minutes(self.effect_duration))
            .min(minutes(self.maximum_effect_duration));

        // Measured against the previous bucket of the same-sign run only; a
        // sign flip or gap restarts the run and leaves no differential term.
        let differential = match run.len() {
            n if n > 1 => current.value - run[n - 2],
            _ => 0.0,
        };
        let differential_correction = if differential < 0.0 {
            self.differential_gain * differential
        } else {
            0.0
        };

        let total = proportional_gain * current.value + integral + differential_correction;
        let velocity = total / discrepancy_minutes(current, grouping_interval);
        tracing::debug!(
            "Integral retrospective correction: {} contiguous discrepancies, total {:.2} mg/dL over {:.0} min",
            run.len(),
            total,
            effect_minutes
        );
        decay_effect(latest_glucose.timestamp, velocity, from_minutes(effect_minutes), self.delta)
    }
}

/// Strategy for the requested correction kind
pub fn strategy(
    kind: RetrospectiveCorrectionKind,
    settings: &RetrospectiveSettings,
    delta: Duration,
) -> Box<dyn RetrospectiveCorrection> {
    match kind {
        RetrospectiveCorrectionKind::Standard => Box::new(StandardRetrospectiveCorrection {
            effect_duration: settings.effect_duration,
            delta,
        }),
        RetrospectiveCorrectionKind::Integral => {
            Box::new(IntegralRetrospectiveCorrection::from_settings(settings, delta))
        }
    }
}

fn recent_discrepancy<'a>(
    latest_glucose: &GlucoseSample,
    discrepancies: &'a [GlucoseChange],
    recency_interval: Duration,
) -> Option<&'a GlucoseChange> {
    discrepancies
        .last()
        .filter(|current| current.end >= latest_glucose.timestamp - recency_interval)
}

fn discrepancy_minutes(current: &GlucoseChange, grouping_interval: Duration) -> f64 {
    minutes(current.end - current.start).max(minutes(grouping_interval))
}

/// Per-window discrepancy between counteraction and the modeled carb effect
pub fn discrepancies(counteraction: &[GlucoseEffectVelocity], carb_effects: &[GlucoseEffect]) -> Vec<GlucoseChange> {
    counteraction
        .iter()
        .map(|velocity| {
            let carb_change = interpolate(carb_effects, velocity.end) - interpolate(carb_effects, velocity.start);
            GlucoseChange {
                start: velocity.start,
                end: velocity.end,
                value: velocity.effect() - carb_change,
            }
        })
        .collect()
}

/// Effect curve value at `date`, linear between points and held past either end
fn interpolate(effects: &[GlucoseEffect], date: DateTime<Utc>) -> f64 {
    let index = effects.partition_point(|effect| effect.timestamp < date);
    match (index.checked_sub(1).and_then(|i| effects.get(i)), effects.get(index)) {
        (_, Some(after)) if after.timestamp == date => after.value,
        (Some(before), Some(after)) => {
            let span = minutes(after.timestamp - before.timestamp);
            let fraction = minutes(date - before.timestamp) / span;
            before.value + (after.value - before.value) * fraction
        }
        (Some(before), None) => before.value,
        (None, Some(after)) => after.value,
        (None, None) => 0.0,
    }
}

/// Running sums of the changes ending within `duration` of each change's end
///
/// `changes` must be sorted by end date.
pub fn combined_sums(changes: &[GlucoseChange], duration: Duration) -> Vec<GlucoseChange> {
    let mut sums = Vec::with_capacity(changes.len());
    let mut window_start = 0;

    for (index, change) in changes.iter().enumerate() {
        while changes[window_start].end < change.end - duration {
            window_start += 1;
        }
        let window = &changes[window_start..=index];
        sums.push(GlucoseChange {
            start: window.iter().map(|c| c.start).min().unwrap_or(change.start),
            end: change.end,
            value: window.iter().map(|c| c.value).sum(),
        });
    }
    sums
}

/// Summed discrepancy buckets over the integration interval ending at the
/// latest glucose
pub fn summed_discrepancies(
    latest_glucose: &GlucoseSample,
    counteraction: &[GlucoseEffectVelocity],
    carb_effects: &[GlucoseEffect],
    settings: &RetrospectiveSettings,
) -> Vec<GlucoseChange> {
    let integration_start = latest_glucose.timestamp - settings.integration_interval;
    let recent: Vec<GlucoseEffectVelocity> = counteraction
        .iter()
        .filter(|velocity| velocity.start >= integration_start)
        .copied()
        .collect();

    let bucket = from_minutes(minutes(settings.grouping_interval) * settings.grouping_interval_multiplier);
    combined_sums(&discrepancies(&recent, carb_effects), bucket)
}

/// Linearly decaying effect from `rate` (mg/dL/min) to near zero over `duration`
///
/// The curve starts at zero on the grid point at or before `from`.
pub fn decay_effect(from: DateTime<Utc>, rate: f64, duration: Duration, delta: Duration) -> Vec<GlucoseEffect> {
    let start = floor_to_interval(from, delta);
    if delta <= Duration::zero() {
        return vec![GlucoseEffect::new(start, 0.0)];
    }
    let end = start + duration;
    let step = minutes(delta);
    let decay_start = start + delta;
    let span = minutes(duration) - step;
    let slope = if span > 0.0 { -rate / span } else { 0.0 };

    let mut effects = vec![GlucoseEffect::new(start, 0.0)];
    let mut value = 0.0;
    let mut date = decay_start;
    while date < end {
        value += (rate + slope * minutes(date - decay_start)) * step;
        effects.push(GlucoseEffect::new(date, value));
        date += delta;
    }
    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn change(end_minutes: i64, value: f64) -> GlucoseChange {
        GlucoseChange {
            start: t0() + Duration::minutes(end_minutes - 5),
            end: t0() + Duration::minutes(end_minutes),
            value,
        }
    }

    #[test]
    fn test_decay_effect_shape() {
        let effects = decay_effect(t0(), 1.0, Duration::minutes(60), Duration::minutes(5));
        assert_eq!(effects.len(), 12);
        assert_eq!(effects[0].value, 0.0);
        assert_eq!(effects[0].timestamp, t0());
        // First step at full rate, then slowing
        assert!((effects[1].value - 5.0).abs() < 1e-12);
        let first_step = effects[1].value - effects[0].value;
        let last_step = effects[11].value - effects[10].value;
        assert!(last_step > 0.0 && last_step < first_step);
    }

    #[test]
    fn test_zero_rate_is_flat() {
        let effects = decay_effect(t0(), 0.0, Duration::minutes(60), Duration::minutes(5));
        assert!(effects.iter().all(|e| e.value == 0.0));
    }

    #[test]
    fn test_combined_sums_window() {
        let changes: Vec<GlucoseChange> = (1..=8).map(|i| change(i * 5, 1.0)).collect();
        let sums = combined_sums(&changes, from_minutes(30.0 * 1.01));

        assert_eq!(sums.len(), 8);
        assert_eq!(sums[0].value, 1.0);
        // Ends 10..40 lie within 30.3 minutes of 40
        assert_eq!(sums[7].value, 7.0);
        assert_eq!(sums[7].start, t0() + Duration::minutes(5));
        assert_eq!(sums[7].end, t0() + Duration::minutes(40));
    }

    #[test]
    fn test_discrepancy_subtracts_carb_change() {
        let velocities = vec![GlucoseEffectVelocity {
            start: t0(),
            end: t0() + Duration::minutes(5),
            rate: 2.0,
        }];
        let carbs = vec![
            GlucoseEffect::new(t0(), 10.0),
            GlucoseEffect::new(t0() + Duration::minutes(5), 14.0),
        ];
        let result = discrepancies(&velocities, &carbs);
        assert!((result[0].value - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolates_between_points() {
        let effects = vec![
            GlucoseEffect::new(t0(), 0.0),
            GlucoseEffect::new(t0() + Duration::minutes(10), 10.0),
        ];
        assert!((interpolate(&effects, t0() + Duration::minutes(4)) - 4.0).abs() < 1e-12);
        assert_eq!(interpolate(&effects, t0() - Duration::minutes(5)), 0.0);
        assert_eq!(interpolate(&effects, t0() + Duration::minutes(30)), 10.0);
        assert_eq!(interpolate(&[], t0()), 0.0);
    }

    #[test]
    fn test_stale_discrepancy_gives_zero_effect() {
        let latest = GlucoseSample::new(t0() + Duration::minutes(60), 120.0);
        let summed = vec![change(30, 20.0)];

        let settings = RetrospectiveSettings::default();
        for kind in [RetrospectiveCorrectionKind::Standard, RetrospectiveCorrectionKind::Integral] {
            let effects = strategy(kind, &settings, Duration::minutes(5)).compute_effect(
                &latest,
                &summed,
                settings.recency_interval,
                settings.grouping_interval,
            );
            assert!(!effects.is_empty());
            assert!(effects.iter().all(|e| e.value == 0.0));
        }
    }

    #[test]
    fn test_standard_velocity_uses_grouping_interval() {
        let latest = GlucoseSample::new(t0() + Duration::minutes(30), 120.0);
        // 15 mg/dL over a 5-minute bucket is spread over the 30-minute grouping
        let summed = vec![change(30, 15.0)];
        let correction = StandardRetrospectiveCorrection {
            effect_duration: Duration::minutes(60),
            delta: Duration::minutes(5),
        };

        let effects = correction.compute_effect(&latest, &summed, Duration::minutes(15), Duration::minutes(30));
        assert!((effects[1].value - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_integral_extends_duration_for_persistent_discrepancy() {
        let settings = RetrospectiveSettings::default();
        let latest = GlucoseSample::new(t0() + Duration::minutes(60), 120.0);
        let summed: Vec<GlucoseChange> = (1..=12).map(|i| change(i * 5, 10.0)).collect();

        let integral = strategy(RetrospectiveCorrectionKind::Integral, &settings, Duration::minutes(5)).compute_effect(
            &latest,
            &summed,
            settings.recency_interval,
            settings.grouping_interval,
        );
        let standard = strategy(RetrospectiveCorrectionKind::Standard, &settings, Duration::minutes(5)).compute_effect(
            &latest,
            &summed,
            settings.recency_interval,
            settings.grouping_interval,
        );

        // 60 - 10 + 12 x 10 = 170 minutes
        assert_eq!(integral.len(), 34);
        assert_eq!(standard.len(), 12);
        assert!(integral.last().unwrap().value > standard.last().unwrap().value);
    }

    #[test]
    fn test_integral_run_breaks_on_sign_change() {
        let correction = IntegralRetrospectiveCorrection::from_settings(&RetrospectiveSettings::default(), Duration::minutes(5));
        let summed = vec![change(5, 4.0), change(10, -3.0), change(15, -2.0), change(20, -1.0)];
        let run = correction.contiguous_run(&summed, Duration::minutes(30));
        assert_eq!(run, vec![-3.0, -2.0, -1.0]);
    }

    #[test]
    fn test_zero_delta_returns_single_point() {
        let effects = decay_effect(t0(), 1.0, Duration::minutes(60), Duration::zero());
        assert_eq!(effects, vec![GlucoseEffect::new(t0(), 0.0)]);
    }

    #[test]
    fn test_differential_needs_same_sign_predecessor() {
        let settings = RetrospectiveSettings::default();
        let latest = GlucoseSample::new(t0() + Duration::minutes(30), 120.0);
        let integral = IntegralRetrospectiveCorrection::from_settings(&settings, Duration::minutes(5));
        let effect = |previous: f64| {
            integral.compute_effect(
                &latest,
                &[change(25, previous), change(30, 10.0)],
                settings.recency_interval,
                settings.grouping_interval,
            )
        };

        // Falling from 20 to 10 pulls the correction below zero
        assert!(effect(20.0)[1].value < 0.0);
        // After a sign flip the run is just the current bucket
        let restarted = effect(-20.0);
        assert!((restarted[1].value - 10.0 / 30.0 * 5.0).abs() < 1e-9);
    }
}
