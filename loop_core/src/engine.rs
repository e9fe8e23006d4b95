//! Top-level forecasting and dosing entry points.
//!
//! One invocation takes a caller-copied [`LoopAlgorithmInput`] and produces:
//! - The glucose forecast and the effect curves it was built from
//! - Insulin and carbs on board at the decision time
//! - The correction classification and the requested kind of recommendation
//!
//! Nothing here keeps state between calls; identical inputs give identical
//! outputs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::carbs::{carbs_on_board, CarbStatus};
use crate::config::AlgorithmSettings;
use crate::correction::{insulin_correction, InsulinCorrection};
use crate::dose::insulin_on_board;
use crate::dosing::{recommended_automatic_dose, recommended_temp_basal, round_down, DosingContext};
use crate::prediction::{generate_prediction, LoopPrediction, PredictionEffects};
use crate::schedule::ScheduleLookup;
use crate::time::hours;
use crate::{
    DoseRecommendation, Error, GlucoseSample, LoopAlgorithmInput, ManualBolusRecommendation, RecommendationKind, Result,
    TempBasalRecommendation,
};

/// Recommendation of the requested kind
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", content = "dose", rename_all = "snake_case")]
pub enum LoopRecommendation {
    ManualBolus(ManualBolusRecommendation),
    AutomaticBolus(DoseRecommendation),
    /// `None` means the pump should keep doing what it is doing
    TempBasal(Option<TempBasalRecommendation>),
}

/// Everything one engine invocation produces
///
/// Glucose values are in mg/dL regardless of the input unit.
#[derive(Clone, Debug, Serialize)]
pub struct LoopAlgorithmOutput {
    pub prediction: Vec<GlucoseSample>,
    pub effects: PredictionEffects,
    pub insulin_on_board: f64,
    pub carbs_on_board: f64,
    pub carb_statuses: Vec<CarbStatus>,
    pub correction: Option<InsulinCorrection>,
    pub recommendation: Option<LoopRecommendation>,
}

/// Forecast only: no correction or recommendation
pub fn predict(input: &LoopAlgorithmInput, settings: &AlgorithmSettings) -> Result<LoopAlgorithmOutput> {
    settings.validate()?;
    let input = input.normalized();
    let prediction = generate_prediction(&input, settings)?;
    Ok(summarize(&input, settings, prediction))
}

/// Forecast, classify and recommend a dose of `input.recommendation_kind`
pub fn run(input: &LoopAlgorithmInput, settings: &AlgorithmSettings) -> Result<LoopAlgorithmOutput> {
    settings.validate()?;
    let input = input.normalized();
    require_schedules(&input)?;

    let prediction = generate_prediction(&input, settings)?;
    let start = prediction.start;
    let mut output = summarize(&input, settings, prediction);

    let Some(target_now) = input.target.value_at(start).copied() else {
        return Err(Error::IncompleteSchedules("target schedule is empty".into()));
    };
    let suspend_threshold = input.suspend_threshold.unwrap_or(target_now.min);

    let correction = insulin_correction(
        &output.prediction,
        start,
        &input.target,
        suspend_threshold,
        &input.sensitivity,
        &input.insulin_model,
        settings.dosing.use_min_until_percent,
    );
    tracing::info!("Correction: {:?}", correction);

    let recommendation = recommend(&input, settings, &correction, &output, start)?;
    tracing::info!("Recommendation: {:?}", recommendation);

    output.correction = Some(correction);
    output.recommendation = Some(recommendation);
    Ok(output)
}

fn require_schedules(input: &LoopAlgorithmInput) -> Result<()> {
    let missing: Vec<&str> = [
        ("basal", input.basal.is_empty()),
        ("sensitivity", input.sensitivity.is_empty()),
        ("target", input.target.is_empty()),
    ]
    .into_iter()
    .filter(|(_, empty)| *empty)
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::IncompleteSchedules(format!("empty schedules: {}", missing.join(", "))))
    }
}

fn summarize(input: &LoopAlgorithmInput, settings: &AlgorithmSettings, prediction: LoopPrediction) -> LoopAlgorithmOutput {
    let iob = insulin_on_board(
        &prediction.annotated_doses,
        &input.insulin_model,
        prediction.start,
        settings.delta,
    );
    let cob = carbs_on_board(&prediction.carb_statuses, prediction.start, &settings.carbs);
    tracing::debug!("IOB {:.2} U, COB {:.1} g at {}", iob, cob, prediction.start);

    LoopAlgorithmOutput {
        prediction: prediction.glucose,
        effects: prediction.effects,
        insulin_on_board: iob,
        carbs_on_board: cob,
        carb_statuses: prediction.carb_statuses,
        correction: None,
        recommendation: None,
    }
}

fn recommend(
    input: &LoopAlgorithmInput,
    settings: &AlgorithmSettings,
    correction: &InsulinCorrection,
    output: &LoopAlgorithmOutput,
    start: DateTime<Utc>,
) -> Result<LoopRecommendation> {
    if input.recommendation_kind == RecommendationKind::ManualBolus {
        let current = output.prediction.first();
        let current_target = current.and_then(|point| input.target.value_at(point.timestamp)).map(|range| range.min);
        let rounder = |units| round_down(units, input.bolus_increment);
        return Ok(LoopRecommendation::ManualBolus(correction.as_manual_bolus(
            input.max_bolus,
            &rounder,
            current,
            current_target,
        )));
    }

    let scheduled_basal_rate = input
        .basal
        .value_at(start)
        .copied()
        .ok_or_else(|| Error::IncompleteSchedules("basal schedule is empty".into()))?;

    let dosing = &settings.dosing;
    let mut context = DosingContext {
        now: start,
        scheduled_basal_rate,
        max_basal_rate: input.max_basal_rate,
        max_bolus: input.max_bolus,
        temp_basal_duration: dosing.temp_basal_duration,
        continuation_interval: dosing.continuation_interval,
        last_temp_basal: input.last_temp_basal.clone(),
        basal_schedule_matches_pump: input.basal_schedule_matches_pump,
        basal_rate_increment: input.basal_rate_increment,
        bolus_increment: input.bolus_increment,
        automatic_bolus_application_factor: input
            .automatic_bolus_application_factor
            .unwrap_or(dosing.automatic_bolus_application_factor),
        automatic_dosing_threshold: input.automatic_dosing_threshold,
    };

    if let Some(max_iob) = input.max_insulin_on_board {
        let headroom = max_iob - output.insulin_on_board;
        if headroom <= 0.0 {
            tracing::info!(
                "IOB {:.2} U at limit {:.2} U, capping temp basal at scheduled rate",
                output.insulin_on_board,
                max_iob
            );
            context.max_basal_rate = context.max_basal_rate.min(scheduled_basal_rate);
        }
        context.max_bolus = context.max_bolus.min(headroom.max(0.0));
    }

    let recommendation = match input.recommendation_kind {
        RecommendationKind::AutomaticBolus => {
            LoopRecommendation::AutomaticBolus(recommended_automatic_dose(correction, &context))
        }
        _ => LoopRecommendation::TempBasal(recommended_temp_basal(correction, &context)),
    };
    tracing::debug!(
        "Dosed against scheduled {:.2} U/hr over {:.1} h",
        scheduled_basal_rate,
        hours(context.temp_basal_duration)
    );
    Ok(recommendation)
}
