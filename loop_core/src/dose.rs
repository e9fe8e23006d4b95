//! Insulin dose annotation and insulin effect curves.
//!
//! Doses are first annotated against the basal schedule: each delivery is
//! split at schedule boundaries and tagged with the basal rate it displaced, so
//! the pharmacologically relevant amount (the deviation from scheduled basal)
//! is known per piece. The insulin effect curve then integrates, step by step,
//! the drop in effect remaining of every active piece times the sensitivity in
//! effect at that step.

use chrono::{DateTime, Duration, Utc};

use crate::insulin::InsulinModel;
use crate::schedule::{ScheduleLookup, ScheduleSegment};
use crate::time::{from_minutes, hours, minutes, simulation_dates};
use crate::{DoseEntry, DoseKind, GlucoseEffect};

/// Doses no longer than this multiple of the effect delta act as a single
/// instantaneous delivery
pub const CONTINUOUS_DELIVERY_THRESHOLD: f64 = 1.05;

/// A dose piece lying within a single basal schedule segment
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedDose {
    pub dose: DoseEntry,
    pub scheduled_basal_rate: f64,
}

impl AnnotatedDose {
    /// Units delivered beyond (or withheld from) the scheduled basal
    pub fn net_basal_units(&self) -> f64 {
        let scheduled = self.scheduled_basal_rate * hours(self.dose.duration());
        match self.dose.kind {
            DoseKind::Bolus => self.dose.units(),
            DoseKind::TempBasal => self.dose.units() - scheduled,
            DoseKind::Suspend => -scheduled,
            DoseKind::Basal | DoseKind::Resume => 0.0,
        }
    }

    /// Fraction of this piece's effect still to come at `date`
    ///
    /// Short pieces act as one delivery at their start. Longer ones are
    /// treated as back-to-back deliveries of `delta` each, so insulin not yet
    /// delivered at `date` counts as fully remaining.
    pub fn percent_effect_remaining(&self, model: &dyn InsulinModel, date: DateTime<Utc>, delta: Duration) -> f64 {
        let elapsed = date - self.dose.start;
        if elapsed <= Duration::zero() {
            return 1.0;
        }

        let duration = minutes(self.dose.duration());
        let step = minutes(delta);
        if duration <= CONTINUOUS_DELIVERY_THRESHOLD * step || step <= 0.0 {
            return model.percent_effect_remaining(elapsed);
        }

        let elapsed = minutes(elapsed);
        let mut remaining = 0.0;
        let mut offset = 0.0;
        while offset < duration {
            let segment = (offset + step).min(duration) - offset;
            remaining += segment / duration * model.percent_effect_remaining(from_minutes(elapsed - offset));
            offset += step;
        }
        remaining
    }
}

/// Split doses at basal schedule boundaries and tag each piece with the
/// scheduled rate it replaced
///
/// Boluses and resume markers are not split; they take the rate in effect at
/// their start.
pub fn annotate_doses(doses: &[DoseEntry], basal: &[ScheduleSegment<f64>]) -> Vec<AnnotatedDose> {
    let mut annotated = Vec::with_capacity(doses.len());

    for dose in doses {
        let spans_time = matches!(dose.kind, DoseKind::Basal | DoseKind::TempBasal | DoseKind::Suspend);
        if !spans_time || dose.end <= dose.start {
            annotated.push(AnnotatedDose {
                dose: dose.clone(),
                scheduled_basal_rate: basal.value_at(dose.start).copied().unwrap_or(0.0),
            });
            continue;
        }

        let total = minutes(dose.duration());
        let windows = basal.overlapping(dose.start, dose.end);
        if windows.is_empty() {
            annotated.push(AnnotatedDose {
                dose: dose.clone(),
                scheduled_basal_rate: 0.0,
            });
            continue;
        }

        for (start, end, rate) in windows {
            let share = minutes(end - start) / total;
            annotated.push(AnnotatedDose {
                dose: DoseEntry {
                    kind: dose.kind,
                    start,
                    end,
                    programmed_units: dose.programmed_units * share,
                    delivered_units: dose.delivered_units.map(|units| units * share),
                },
                scheduled_basal_rate: *rate,
            });
        }
    }

    annotated
}

/// Cumulative glucose effect of `doses` on the `delta` grid over `[start, end]`
///
/// The first point is zero; each following point adds
/// `net units x (effect remaining before - effect remaining now) x -sensitivity`
/// summed over every dose.
pub fn glucose_effects(
    doses: &[AnnotatedDose],
    model: &dyn InsulinModel,
    sensitivity: &[ScheduleSegment<f64>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta: Duration,
) -> Vec<GlucoseEffect> {
    let dates = simulation_dates(start, end, delta);
    let Some(&first) = dates.first() else {
        return Vec::new();
    };

    let effect_duration = model.effect_duration();
    let active: Vec<&AnnotatedDose> = doses
        .iter()
        .filter(|dose| dose.dose.end + effect_duration > first && dose.net_basal_units() != 0.0)
        .collect();

    let mut previous: Vec<f64> = active
        .iter()
        .map(|dose| dose.percent_effect_remaining(model, first, delta))
        .collect();

    let mut effects = Vec::with_capacity(dates.len());
    let mut value = 0.0;
    effects.push(GlucoseEffect::new(first, value));

    for &date in &dates[1..] {
        let isf = sensitivity.value_at(date).copied().unwrap_or(0.0);
        for (dose, previous_remaining) in active.iter().zip(previous.iter_mut()) {
            let remaining = dose.percent_effect_remaining(model, date, delta);
            value += dose.net_basal_units() * (*previous_remaining - remaining) * -isf;
            *previous_remaining = remaining;
        }
        effects.push(GlucoseEffect::new(date, value));
    }

    tracing::debug!(
        "Built insulin effect curve: {} points from {} doses",
        effects.len(),
        active.len()
    );
    effects
}

/// Net insulin still to act at `date`, in units
pub fn insulin_on_board(doses: &[AnnotatedDose], model: &dyn InsulinModel, date: DateTime<Utc>, delta: Duration) -> f64 {
    doses
        .iter()
        .filter(|dose| dose.dose.start <= date)
        .map(|dose| dose.net_basal_units() * dose.percent_effect_remaining(model, date, delta))
        .sum()
}
