//! Carbohydrate absorption tracking and forward carb effects.
//!
//! Positive counteraction is distributed across the carb entries that could
//! be absorbing at the time, in proportion to each entry's modeled absorption
//! rate. What each entry has been seen to absorb then adapts its absorption
//! window: entries absorbing faster than modeled finish sooner, slower ones are
//! stretched up to `absorption_time x absorption_time_overrun`, and no entry is
//! ever credited with less than that slowest allowed pace.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::absorption::CarbAbsorptionModel;
use crate::config::CarbSettings;
use crate::schedule::{ScheduleLookup, ScheduleSegment};
use crate::time::{from_minutes, minutes, serde_minutes, simulation_dates};
use crate::{CarbEntry, GlucoseEffect, GlucoseEffectVelocity};

/// Grams attributed to one entry over one counteraction window
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbValue {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub grams: f64,
}

/// What has been observed of an entry's absorption so far
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AbsorbedCarbValue {
    pub observed_grams: f64,
    /// Observed grams raised to the minimum absorption pace, capped at the total
    pub clamped_grams: f64,
    pub total_grams: f64,
    pub remaining_grams: f64,
    pub observation_start: DateTime<Utc>,
    pub observation_end: DateTime<Utc>,
    #[serde(with = "serde_minutes")]
    pub time_to_absorb_observed: Duration,
    #[serde(with = "serde_minutes")]
    pub estimated_time_remaining: Duration,
}

/// Absorption state of a single carb entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbStatus {
    pub entry: CarbEntry,
    #[serde(with = "serde_minutes")]
    pub absorption_time: Duration,
    pub model: CarbAbsorptionModel,
    /// Glucose rise per gram, in mg/dL/g
    pub carb_sensitivity: f64,
    pub absorption: Option<AbsorbedCarbValue>,
    pub observed_timeline: Vec<CarbValue>,
}

struct StatusBuilder<'a> {
    entry: &'a CarbEntry,
    model: CarbAbsorptionModel,
    absorption_time: f64,
    max_absorption_time: f64,
    delay: Duration,
    carb_sensitivity: f64,
    observed_effect: f64,
    timeline: Vec<CarbValue>,
    observation_start: Option<DateTime<Utc>>,
    last_effect_date: Option<DateTime<Utc>>,
    completion_date: Option<DateTime<Utc>>,
}

impl<'a> StatusBuilder<'a> {
    fn absorption_start(&self) -> DateTime<Utc> {
        self.entry.start + self.delay
    }

    fn max_end(&self) -> DateTime<Utc> {
        self.absorption_start() + from_minutes(self.max_absorption_time)
    }

    fn is_active_at(&self, date: DateTime<Utc>) -> bool {
        self.entry.start <= date && date < self.max_end()
    }

    fn entry_effect(&self) -> f64 {
        self.entry.grams * self.carb_sensitivity
    }

    fn remaining_effect(&self) -> f64 {
        (self.entry_effect() - self.observed_effect).max(0.0)
    }

    /// Modeled effect rate at `date`, in mg/dL per minute
    fn absorption_rate_at(&self, date: DateTime<Utc>) -> f64 {
        if self.absorption_time <= 0.0 {
            return 0.0;
        }
        let percent_time = minutes(date - self.absorption_start()) / self.absorption_time;
        self.model.percent_rate_at_percent_time(percent_time) * self.entry.grams / self.absorption_time
            * self.carb_sensitivity
    }

    fn add_effect(&mut self, effect: f64, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.observation_start.get_or_insert(start);
        self.last_effect_date = Some(end);
        if effect <= 0.0 {
            return;
        }

        self.observed_effect += effect;
        if self.carb_sensitivity > 0.0 {
            self.timeline.push(CarbValue {
                start,
                end,
                grams: effect / self.carb_sensitivity,
            });
        }
        if self.completion_date.is_none() && self.observed_effect >= self.entry_effect() {
            self.completion_date = Some(end);
        }
    }

    fn build(self) -> CarbStatus {
        let absorption = match (self.observation_start, self.last_effect_date) {
            (Some(observation_start), Some(observation_end)) => Some(self.absorbed_value(observation_start, observation_end)),
            _ => None,
        };

        CarbStatus {
            entry: self.entry.clone(),
            absorption_time: from_minutes(self.absorption_time),
            model: self.model,
            carb_sensitivity: self.carb_sensitivity,
            absorption,
            observed_timeline: self.timeline,
        }
    }

    fn absorbed_value(&self, observation_start: DateTime<Utc>, observation_end: DateTime<Utc>) -> AbsorbedCarbValue {
        let grams = self.entry.grams;
        let elapsed = minutes(observation_end - self.absorption_start()).max(0.0);

        let observed_grams = if self.carb_sensitivity > 0.0 {
            self.observed_effect / self.carb_sensitivity
        } else {
            0.0
        };
        let min_absorbed = grams * self.model.percent_absorbed_at_percent_time(elapsed / self.max_absorption_time);
        let clamped_grams = observed_grams.max(min_absorbed).min(grams).max(0.0);
        let remaining_grams = (grams - clamped_grams).max(0.0);

        let time_to_absorb_observed = self
            .completion_date
            .map(|date| minutes(date - self.absorption_start()).max(0.0))
            .unwrap_or(elapsed);

        let estimated_time_remaining = if remaining_grams <= 0.0 || grams <= 0.0 {
            0.0
        } else {
            let percent_time = self.model.percent_time_at_percent_absorbed(clamped_grams / grams);
            let fallback = self.absorption_time * (1.0 - percent_time);
            let dynamic = if percent_time > 0.0 && elapsed > 0.0 {
                elapsed / percent_time - elapsed
            } else {
                fallback
            };
            let dynamic = if dynamic > 0.0 { dynamic } else { fallback };
            let not_to_exceed = (self.max_absorption_time - elapsed).max(0.0);
            dynamic.min(not_to_exceed)
        };

        AbsorbedCarbValue {
            observed_grams,
            clamped_grams,
            total_grams: grams,
            remaining_grams,
            observation_start,
            observation_end,
            time_to_absorb_observed: from_minutes(time_to_absorb_observed),
            estimated_time_remaining: from_minutes(estimated_time_remaining),
        }
    }
}

/// Attribute counteraction to carb entries and summarize each entry's absorption
///
/// `counteraction` must be sorted by start date.
pub fn carb_statuses(
    entries: &[CarbEntry],
    counteraction: &[GlucoseEffectVelocity],
    carb_ratio: &[ScheduleSegment<f64>],
    sensitivity: &[ScheduleSegment<f64>],
    settings: &CarbSettings,
    default_model: CarbAbsorptionModel,
) -> Vec<CarbStatus> {
    let mut builders: Vec<StatusBuilder> = entries
        .iter()
        .map(|entry| {
            let absorption_time = minutes(entry.absorption_time.unwrap_or(settings.default_absorption_time));
            StatusBuilder {
                entry,
                model: entry.absorption_model.unwrap_or(default_model),
                absorption_time,
                max_absorption_time: absorption_time * settings.absorption_time_overrun,
                delay: settings.delay,
                carb_sensitivity: carb_sensitivity(entry, carb_ratio, sensitivity),
                observed_effect: 0.0,
                timeline: Vec::new(),
                observation_start: None,
                last_effect_date: None,
                completion_date: None,
            }
        })
        .collect();

    for velocity in counteraction {
        let active: Vec<usize> = builders
            .iter()
            .enumerate()
            .filter(|(_, builder)| builder.is_active_at(velocity.start))
            .map(|(index, _)| index)
            .collect();
        if active.is_empty() {
            continue;
        }

        let rates: Vec<f64> = active
            .iter()
            .map(|&index| builders[index].absorption_rate_at(velocity.start))
            .collect();
        let mut total_rate: f64 = rates.iter().sum();
        let mut effect_value = velocity.effect().max(0.0);

        for (position, &index) in active.iter().enumerate() {
            let builder = &mut builders[index];
            let share = if total_rate > 0.0 {
                rates[position] / total_rate
            } else {
                1.0 / (active.len() - position) as f64
            };
            let partial = (effect_value * share).min(builder.remaining_effect());
            total_rate -= rates[position];
            effect_value -= partial;
            builder.add_effect(partial, velocity.start, velocity.end);

            // Unattributed effect is overrun on the last active entry
            if position == active.len() - 1 && effect_value > 0.0 {
                builder.add_effect(effect_value, velocity.start, velocity.end);
                effect_value = 0.0;
            }
        }
    }

    builders.into_iter().map(StatusBuilder::build).collect()
}

/// mg/dL per gram for an entry: sensitivity over carb ratio at the entry start
fn carb_sensitivity(entry: &CarbEntry, carb_ratio: &[ScheduleSegment<f64>], sensitivity: &[ScheduleSegment<f64>]) -> f64 {
    match (sensitivity.value_at(entry.start), carb_ratio.value_at(entry.start)) {
        (Some(isf), Some(ratio)) if *ratio > 0.0 => isf / ratio,
        _ => {
            tracing::warn!("No usable carb ratio at {}, carb entry ignored", entry.start);
            0.0
        }
    }
}

impl CarbStatus {
    fn absorption_start(&self, settings: &CarbSettings) -> DateTime<Utc> {
        self.entry.start + settings.delay
    }

    /// Grams absorbed by `date`, following observation then the adapted model
    pub fn absorbed_carbs(&self, date: DateTime<Utc>, settings: &CarbSettings) -> f64 {
        let grams = self.entry.grams;
        let Some(absorption) = &self.absorption else {
            return self
                .model
                .absorbed_carbs(grams, date - self.absorption_start(settings), self.absorption_time);
        };

        if date <= absorption.observation_end {
            let observed: f64 = self
                .observed_timeline
                .iter()
                .filter(|value| value.start < date)
                .map(|value| {
                    if value.end <= date {
                        value.grams
                    } else {
                        value.grams * minutes(date - value.start) / minutes(value.end - value.start)
                    }
                })
                .sum();
            return observed.clamp(0.0, grams.max(0.0));
        }

        let total = minutes(absorption.time_to_absorb_observed + absorption.estimated_time_remaining);
        if total <= 0.0 || absorption.remaining_grams <= 0.0 {
            return absorption.clamped_grams;
        }
        let effective_time = minutes(absorption.time_to_absorb_observed + (date - absorption.observation_end));
        let modeled = grams * self.model.percent_absorbed_at_percent_time(effective_time / total);
        modeled.max(absorption.clamped_grams).min(grams)
    }

    /// Grams still to absorb at `date`; zero for entries not yet eaten
    pub fn carbs_on_board(&self, date: DateTime<Utc>, settings: &CarbSettings) -> f64 {
        if self.entry.start > date {
            return 0.0;
        }
        (self.entry.grams - self.absorbed_carbs(date, settings)).max(0.0)
    }
}

/// Cumulative glucose rise from all carb entries on the `delta` grid over `[start, end]`
pub fn carb_glucose_effects(
    statuses: &[CarbStatus],
    settings: &CarbSettings,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta: Duration,
) -> Vec<GlucoseEffect> {
    let effects: Vec<GlucoseEffect> = simulation_dates(start, end, delta)
        .into_iter()
        .map(|date| {
            let value = statuses
                .iter()
                .map(|status| status.carb_sensitivity * status.absorbed_carbs(date, settings))
                .sum();
            GlucoseEffect::new(date, value)
        })
        .collect();

    tracing::debug!(
        "Built carb effect curve: {} points from {} entries",
        effects.len(),
        statuses.len()
    );
    effects
}

/// Total grams still to absorb at `date`
pub fn carbs_on_board(statuses: &[CarbStatus], date: DateTime<Utc>, settings: &CarbSettings) -> f64 {
    statuses
        .iter()
        .map(|status| status.carbs_on_board(date, settings))
        .sum()
}
