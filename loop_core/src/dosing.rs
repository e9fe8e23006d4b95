//! Dose translation.
//!
//! Turns an [`InsulinCorrection`] into something a pump can act on: a clamped
//! temp basal, a partial automatic bolus, or a manual bolus with a notice.
//! None of these functions fail; every finite input yields a clamped output.

use chrono::{DateTime, Duration, Utc};

use crate::correction::InsulinCorrection;
use crate::time::hours;
use crate::{BolusRecommendationNotice, DoseEntry, DoseKind, DoseRecommendation, GlucoseSample, ManualBolusRecommendation, TempBasalRecommendation};

/// Rates closer than this, in U/hr, are considered equal
pub const RATE_TOLERANCE: f64 = 1e-6;

/// Rounds an amount to what the pump can deliver
pub type Rounder<'a> = &'a dyn Fn(f64) -> f64;

/// Round down to a multiple of `increment`; identity without one
pub fn round_down(value: f64, increment: Option<f64>) -> f64 {
    match increment {
        Some(step) if step > 0.0 && value.is_finite() => {
            // Absorb representation error, e.g. 0.3 / 0.05 = 5.999...
            (value / step + 1e-9).floor() * step
        }
        _ => value,
    }
}

impl InsulinCorrection {
    /// Temp basal delivering this correction over `duration` on top of the
    /// scheduled rate, clamped to `[0, max_basal_rate]`
    pub fn as_temp_basal(
        &self,
        scheduled_basal_rate: f64,
        max_basal_rate: f64,
        duration: Duration,
        rounder: Rounder,
    ) -> TempBasalRecommendation {
        // A zero-length temp basal cannot carry a correction
        let mut rate = if hours(duration) > 0.0 {
            self.units() / hours(duration)
        } else {
            0.0
        };
        if !matches!(self, InsulinCorrection::Suspend { .. }) {
            rate += scheduled_basal_rate;
        }
        if !rate.is_finite() {
            rate = 0.0;
        }
        let max = max_basal_rate.max(0.0);
        let rate = rounder(rate.clamp(0.0, max)).clamp(0.0, max);
        TempBasalRecommendation::new(rate, duration)
    }

    /// Bolus for the whole correction, clamped to `[0, max_bolus]`
    ///
    /// `current_glucose` and `current_target_min` flag a bolus recommended
    /// while glucose is already under target.
    pub fn as_manual_bolus(
        &self,
        max_bolus: f64,
        rounder: Rounder,
        current_glucose: Option<&GlucoseSample>,
        current_target_min: Option<f64>,
    ) -> ManualBolusRecommendation {
        let amount = rounder(self.units().clamp(0.0, max_bolus.max(0.0))).clamp(0.0, max_bolus.max(0.0));
        let notice = match self {
            InsulinCorrection::Suspend { min_glucose } => Some(BolusRecommendationNotice::GlucoseBelowSuspendThreshold {
                min_glucose: *min_glucose,
            }),
            InsulinCorrection::InRange => Some(BolusRecommendationNotice::PredictedGlucoseInRange),
            InsulinCorrection::EntirelyBelowRange { min_glucose, .. } => {
                Some(BolusRecommendationNotice::AllGlucoseBelowTarget {
                    min_glucose: *min_glucose,
                })
            }
            InsulinCorrection::AboveRange {
                min_glucose,
                min_target,
                units,
                ..
            } => match (current_glucose, current_target_min) {
                (Some(current), Some(target)) if current.value < target => {
                    Some(BolusRecommendationNotice::CurrentGlucoseBelowTarget { glucose: *current })
                }
                _ if *units > 0.0 && min_glucose.value < *min_target => {
                    Some(BolusRecommendationNotice::PredictedGlucoseBelowTarget {
                        min_glucose: *min_glucose,
                    })
                }
                _ => None,
            },
        };
        ManualBolusRecommendation { amount, notice }
    }

    /// `factor` of the correction, rounded and capped at `max_bolus_units`
    pub fn as_partial_bolus(&self, factor: f64, max_bolus_units: f64, rounder: Rounder) -> f64 {
        let partial = self.units() * factor;
        rounder(partial).min(rounder(max_bolus_units.max(0.0))).max(0.0)
    }
}

impl TempBasalRecommendation {
    /// Suppress commands that would not change what the pump is doing
    ///
    /// Returns `None` for "no change". A running temp basal at the same rate
    /// with more than `continuation_interval` left is kept; a recommendation
    /// equal to the scheduled rate becomes a cancel of the running temp, or no
    /// change when none is running. Both scheduled-rate rules only apply when
    /// the scheduled rate matches the pump's own schedule.
    pub fn if_necessary(
        self,
        now: DateTime<Utc>,
        scheduled_basal_rate: f64,
        last_temp_basal: Option<&DoseEntry>,
        continuation_interval: Duration,
        scheduled_matches_pump: bool,
    ) -> Option<TempBasalRecommendation> {
        let matches_rate = |rate: f64| match self.units_per_hour() {
            Some(units_per_hour) => (units_per_hour - rate).abs() < RATE_TOLERANCE,
            None => false,
        };

        let active = last_temp_basal.filter(|dose| dose.kind == DoseKind::TempBasal && dose.end > now);
        match active {
            Some(dose) => {
                if matches_rate(dose.units_per_hour()) && dose.end - now > continuation_interval {
                    return None;
                }
                if matches_rate(scheduled_basal_rate) && scheduled_matches_pump {
                    return Some(TempBasalRecommendation::Cancel);
                }
            }
            None => {
                if matches_rate(scheduled_basal_rate) && scheduled_matches_pump {
                    return None;
                }
            }
        }
        Some(self)
    }
}

/// Limits and pump state a dose decision is made against
#[derive(Clone, Debug)]
pub struct DosingContext {
    pub now: DateTime<Utc>,
    pub scheduled_basal_rate: f64,
    pub max_basal_rate: f64,
    pub max_bolus: f64,
    pub temp_basal_duration: Duration,
    pub continuation_interval: Duration,
    pub last_temp_basal: Option<DoseEntry>,
    pub basal_schedule_matches_pump: bool,
    pub basal_rate_increment: Option<f64>,
    pub bolus_increment: Option<f64>,
    pub automatic_bolus_application_factor: f64,
    pub automatic_dosing_threshold: Option<f64>,
}

/// Temp-basal-only automatic dosing
pub fn recommended_temp_basal(correction: &InsulinCorrection, context: &DosingContext) -> Option<TempBasalRecommendation> {
    let rounder = |rate| round_down(rate, context.basal_rate_increment);
    correction
        .as_temp_basal(
            context.scheduled_basal_rate,
            context.max_basal_rate,
            context.temp_basal_duration,
            &rounder,
        )
        .if_necessary(
            context.now,
            context.scheduled_basal_rate,
            context.last_temp_basal.as_ref(),
            context.continuation_interval,
            context.basal_schedule_matches_pump,
        )
}

/// Automatic bolus dosing: a partial bolus plus a temp basal that never
/// exceeds the scheduled rate
pub fn recommended_automatic_dose(correction: &InsulinCorrection, context: &DosingContext) -> DoseRecommendation {
    let capped = DosingContext {
        max_basal_rate: context.scheduled_basal_rate.min(context.max_basal_rate),
        ..context.clone()
    };
    let basal_adjustment = recommended_temp_basal(correction, &capped);

    let below_threshold = match (correction.min_glucose(), context.automatic_dosing_threshold) {
        (Some(min), Some(threshold)) => min.value < threshold,
        _ => false,
    };
    let bolus_units = if below_threshold {
        tracing::info!("Minimum forecast below dosing threshold, withholding automatic bolus");
        0.0
    } else {
        let rounder = |units| round_down(units, context.bolus_increment);
        correction.as_partial_bolus(context.automatic_bolus_application_factor, context.max_bolus, &rounder)
    };

    DoseRecommendation {
        basal_adjustment,
        bolus_units: Some(bolus_units),
    }
}
