//! Glucose forecasting.
//!
//! Every effect curve is reduced to per-timestamp deltas, the deltas of the
//! selected curves are summed, momentum is blended in over its own short
//! window, and the result is integrated onto the latest glucose reading.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::carbs::{carb_glucose_effects, carb_statuses, CarbStatus};
use crate::config::AlgorithmSettings;
use crate::counteraction::counteraction_effects;
use crate::dose::{annotate_doses, glucose_effects, AnnotatedDose};
use crate::insulin::InsulinModel;
use crate::momentum::momentum_effect;
use crate::retrospective::{strategy, summed_discrepancies};
use crate::schedule::ScheduleLookup;
use crate::time::floor_to_interval;
use crate::{Error, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, LoopAlgorithmInput, Result};

/// The underlying curves a forecast was built from
#[derive(Clone, Debug, Default, Serialize)]
pub struct PredictionEffects {
    pub insulin: Vec<GlucoseEffect>,
    pub carbs: Vec<GlucoseEffect>,
    pub retrospective_correction: Vec<GlucoseEffect>,
    pub momentum: Vec<GlucoseEffect>,
    pub insulin_counteraction: Vec<GlucoseEffectVelocity>,
}

/// Forecast plus everything computed on the way to it
#[derive(Clone, Debug)]
pub struct LoopPrediction {
    pub glucose: Vec<GlucoseSample>,
    pub effects: PredictionEffects,
    pub carb_statuses: Vec<CarbStatus>,
    pub annotated_doses: Vec<AnnotatedDose>,
    pub latest_glucose: GlucoseSample,
    pub start: DateTime<Utc>,
}

/// Integrate effect curves onto `starting_glucose`
///
/// Each curve contributes the change between consecutive points at the later
/// point's timestamp. Momentum, when it has more than two points, replaces the
/// summed effects near the start and hands over linearly to them by its last
/// point. Only timestamps after the starting glucose produce forecast points.
pub fn predict_glucose(
    starting_glucose: &GlucoseSample,
    momentum: &[GlucoseEffect],
    effects: &[&[GlucoseEffect]],
) -> Vec<GlucoseSample> {
    let mut deltas: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();

    for timeline in effects {
        let Some(first) = timeline.first() else {
            continue;
        };
        let mut previous = first.value;
        for effect in timeline.iter() {
            *deltas.entry(effect.timestamp).or_insert(0.0) += effect.value - previous;
            previous = effect.value;
        }
    }

    if momentum.len() > 2 {
        let blend_count = (momentum.len() - 2) as f64;
        let step = (momentum[1].timestamp - momentum[0].timestamp).num_milliseconds() as f64;
        let offset = (starting_glucose.timestamp - momentum[0].timestamp).num_milliseconds() as f64;
        let blend_slope = 1.0 / blend_count;
        let blend_offset = if step > 0.0 { offset / step * blend_slope } else { 0.0 };

        let mut previous = momentum[0].value;
        for (index, effect) in momentum.iter().enumerate() {
            let split = ((momentum.len() - index) as f64 / blend_count - blend_slope + blend_offset).clamp(0.0, 1.0);
            let summed = deltas.entry(effect.timestamp).or_insert(0.0);
            *summed = (1.0 - split) * *summed + split * (effect.value - previous);
            previous = effect.value;
        }
    }

    let mut prediction = vec![*starting_glucose];
    let mut value = starting_glucose.value;
    for (timestamp, delta) in deltas {
        if timestamp > starting_glucose.timestamp {
            value += delta;
            prediction.push(GlucoseSample::new(timestamp, value));
        }
    }
    prediction
}

/// Build the forecast and its diagnostic curves from a normalized input
pub fn generate_prediction(input: &LoopAlgorithmInput, settings: &AlgorithmSettings) -> Result<LoopPrediction> {
    let mut glucose = input.glucose_history.clone();
    glucose.sort_by_key(|sample| sample.timestamp);
    let latest_glucose = *glucose.last().ok_or(Error::MissingGlucose)?;
    let start = input.prediction_start.unwrap_or(latest_glucose.timestamp);

    let mut doses = input.doses.clone();
    doses.sort_by_key(|dose| dose.start);
    if let Some(first_dose) = doses.first() {
        if !input.basal.covers_from(first_dose.start) {
            return Err(Error::IncompleteSchedules(format!(
                "basal schedule does not cover doses from {}",
                first_dose.start
            )));
        }
    }

    let delta = settings.delta;
    let model = input.insulin_model;
    let effect_duration = model.effect_duration();
    let history_start = floor_to_interval(start - settings.carbs.maximum_absorption_window, delta);
    let last_delivery = doses.iter().map(|dose| dose.end).max().unwrap_or(start).max(start);
    let horizon = last_delivery + effect_duration;

    // Insulin
    let annotated_doses = annotate_doses(&doses, &input.basal);
    let insulin = glucose_effects(&annotated_doses, &model, &input.sensitivity, history_start, horizon, delta);

    // Counteraction over the span the insulin curve covers
    let observed: Vec<GlucoseSample> = glucose.iter().filter(|s| s.timestamp >= history_start).copied().collect();
    let insulin_counteraction = counteraction_effects(&observed, &insulin);

    // Carbs
    let mut entries = input.carb_entries.clone();
    entries.sort_by_key(|entry| entry.start);
    let statuses = carb_statuses(
        &entries,
        &insulin_counteraction,
        &input.carb_ratio,
        &input.sensitivity,
        &settings.carbs,
        input.carb_absorption_model,
    );
    let carbs = carb_glucose_effects(&statuses, &settings.carbs, history_start, horizon, delta);

    // Retrospective correction
    let retro = &settings.retrospective;
    let summed = summed_discrepancies(&latest_glucose, &insulin_counteraction, &carbs, retro);
    let retrospective_correction = strategy(input.retrospective_correction, retro, delta).compute_effect(
        &latest_glucose,
        &summed,
        retro.recency_interval,
        retro.grouping_interval,
    );

    // Momentum
    let options = input.included_effects;
    let momentum = if options.momentum {
        let momentum_start = start - settings.momentum.data_interval;
        let recent: Vec<GlucoseSample> = glucose
            .iter()
            .filter(|s| s.timestamp >= momentum_start && s.timestamp <= start)
            .copied()
            .collect();
        momentum_effect(&recent, &settings.momentum, delta)
    } else {
        Vec::new()
    };

    let mut selected: Vec<&[GlucoseEffect]> = Vec::new();
    if options.carbs {
        selected.push(&carbs);
    }
    if options.insulin {
        selected.push(&insulin);
    }
    if options.retrospection {
        selected.push(&retrospective_correction);
    }

    let mut forecast = predict_glucose(&latest_glucose, &momentum, &selected);

    let final_date = latest_glucose.timestamp + effect_duration;
    if let Some(last) = forecast.last().copied() {
        if last.timestamp < final_date {
            forecast.push(GlucoseSample::new(final_date, last.value));
        }
    }

    tracing::debug!(
        "Forecast has {} points ({} insulin, {} carb, {} retrospective, {} momentum, {} counteraction)",
        forecast.len(),
        insulin.len(),
        carbs.len(),
        retrospective_correction.len(),
        momentum.len(),
        insulin_counteraction.len()
    );

    Ok(LoopPrediction {
        glucose: forecast,
        effects: PredictionEffects {
            insulin,
            carbs,
            retrospective_correction,
            momentum,
            insulin_counteraction,
        },
        carb_statuses: statuses,
        annotated_doses,
        latest_glucose,
        start,
    })
}
