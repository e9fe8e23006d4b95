//! Core domain types for the dosing engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Glucose samples, units and target ranges
//! - Dose and carb history entries
//! - Discretized effect curves
//! - Dosing recommendations
//! - The aggregate input snapshot

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::absorption::CarbAbsorptionModel;
use crate::insulin::InsulinModelPreset;
use crate::schedule::ScheduleSegment;
use crate::time::{hours, minutes, serde_minutes, serde_minutes_option};

// ============================================================================
// Glucose Types
// ============================================================================

/// mg/dL per mmol/L
pub const MILLIGRAMS_PER_DECILITER_PER_MILLIMOLE: f64 = 18.0156;

/// Unit the caller reports glucose in
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MilligramsPerDeciliter,
    #[serde(rename = "mmol/L")]
    MillimolesPerLiter,
}

impl GlucoseUnit {
    /// Convert a value in this unit to mg/dL
    pub fn to_mgdl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MilligramsPerDeciliter => value,
            GlucoseUnit::MillimolesPerLiter => value * MILLIGRAMS_PER_DECILITER_PER_MILLIMOLE,
        }
    }

    /// Convert a mg/dL value to this unit
    pub fn from_mgdl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MilligramsPerDeciliter => value,
            GlucoseUnit::MillimolesPerLiter => value / MILLIGRAMS_PER_DECILITER_PER_MILLIMOLE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlucoseUnit::MilligramsPerDeciliter => "mg/dL",
            GlucoseUnit::MillimolesPerLiter => "mmol/L",
        }
    }
}

/// An observed or predicted glucose value
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl GlucoseSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Closed glucose target range
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseRange {
    pub min: f64,
    pub max: f64,
}

impl GlucoseRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn average(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

// ============================================================================
// History Types
// ============================================================================

/// Kind of insulin delivery record
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseKind {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

/// One insulin delivery record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseEntry {
    pub kind: DoseKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub programmed_units: f64,
    #[serde(default)]
    pub delivered_units: Option<f64>,
}

impl DoseEntry {
    /// An immediate bolus
    pub fn bolus(at: DateTime<Utc>, units: f64) -> Self {
        Self {
            kind: DoseKind::Bolus,
            start: at,
            end: at,
            programmed_units: units,
            delivered_units: None,
        }
    }

    /// A temp basal programmed at `units_per_hour`
    pub fn temp_basal(start: DateTime<Utc>, end: DateTime<Utc>, units_per_hour: f64) -> Self {
        Self {
            kind: DoseKind::TempBasal,
            start,
            end,
            programmed_units: units_per_hour * hours(end - start),
            delivered_units: None,
        }
    }

    /// Delivery suspended over `[start, end)`
    pub fn suspend(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            kind: DoseKind::Suspend,
            start,
            end,
            programmed_units: 0.0,
            delivered_units: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Units actually delivered, falling back to the programmed amount
    pub fn units(&self) -> f64 {
        self.delivered_units.unwrap_or(self.programmed_units)
    }

    /// Programmed delivery rate; zero for instantaneous doses
    pub fn units_per_hour(&self) -> f64 {
        let duration = hours(self.duration());
        if duration > 0.0 {
            self.programmed_units / duration
        } else {
            0.0
        }
    }
}

/// A declared carbohydrate intake
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbEntry {
    pub start: DateTime<Utc>,
    pub grams: f64,
    #[serde(default, with = "serde_minutes_option")]
    pub absorption_time: Option<Duration>,
    #[serde(default)]
    pub absorption_model: Option<CarbAbsorptionModel>,
}

impl CarbEntry {
    pub fn new(start: DateTime<Utc>, grams: f64, absorption_time: Option<Duration>) -> Self {
        Self {
            start,
            grams,
            absorption_time,
            absorption_model: None,
        }
    }
}

// ============================================================================
// Effect Types
// ============================================================================

/// One sample of a cumulative glucose effect curve, in mg/dL
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffect {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl GlucoseEffect {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Average rate of a glucose effect over a window, in mg/dL per minute
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffectVelocity {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rate: f64,
}

impl GlucoseEffectVelocity {
    /// Total effect over the window, in mg/dL
    pub fn effect(&self) -> f64 {
        self.rate * minutes(self.end - self.start)
    }
}

/// A glucose change over a window, in mg/dL
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseChange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

/// Which effects feed the forecast
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectOptions {
    pub carbs: bool,
    pub insulin: bool,
    pub momentum: bool,
    pub retrospection: bool,
}

impl EffectOptions {
    pub const ALL: EffectOptions = EffectOptions {
        carbs: true,
        insulin: true,
        momentum: true,
        retrospection: true,
    };

    pub const NONE: EffectOptions = EffectOptions {
        carbs: false,
        insulin: false,
        momentum: false,
        retrospection: false,
    };
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self::ALL
    }
}

/// Retrospective correction strategy
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrospectiveCorrectionKind {
    #[default]
    Standard,
    Integral,
}

// ============================================================================
// Recommendation Types
// ============================================================================

/// Kind of dosing recommendation requested from the engine
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ManualBolus,
    AutomaticBolus,
    #[default]
    TempBasal,
}

/// Temp basal command for the pump
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TempBasalRecommendation {
    /// Deliver `units_per_hour` for `duration`
    Set {
        units_per_hour: f64,
        #[serde(with = "serde_minutes")]
        duration: Duration,
    },
    /// Cancel the running temp basal and return to the scheduled rate
    Cancel,
}

impl TempBasalRecommendation {
    pub fn new(units_per_hour: f64, duration: Duration) -> Self {
        TempBasalRecommendation::Set {
            units_per_hour,
            duration,
        }
    }

    pub fn units_per_hour(&self) -> Option<f64> {
        match self {
            TempBasalRecommendation::Set { units_per_hour, .. } => Some(*units_per_hour),
            TempBasalRecommendation::Cancel => None,
        }
    }
}

/// Combined automatic dosing decision
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct DoseRecommendation {
    pub basal_adjustment: Option<TempBasalRecommendation>,
    pub bolus_units: Option<f64>,
}

/// Why a manual bolus recommendation is smaller than the user may expect
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BolusRecommendationNotice {
    GlucoseBelowSuspendThreshold { min_glucose: GlucoseSample },
    CurrentGlucoseBelowTarget { glucose: GlucoseSample },
    PredictedGlucoseBelowTarget { min_glucose: GlucoseSample },
    PredictedGlucoseInRange,
    AllGlucoseBelowTarget { min_glucose: GlucoseSample },
}

/// Bolus recommendation shown to the user
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManualBolusRecommendation {
    pub amount: f64,
    pub notice: Option<BolusRecommendationNotice>,
}

// ============================================================================
// Input Snapshot
// ============================================================================

/// Everything one engine invocation needs, copied in by the caller
///
/// Glucose-valued fields (samples, sensitivities, targets, suspend threshold)
/// are in `glucose_unit`; rates are U/hr, ratios g/U, doses U.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopAlgorithmInput {
    #[serde(default)]
    pub prediction_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub glucose_unit: GlucoseUnit,
    pub glucose_history: Vec<GlucoseSample>,
    #[serde(default)]
    pub doses: Vec<DoseEntry>,
    #[serde(default)]
    pub carb_entries: Vec<CarbEntry>,
    pub basal: Vec<ScheduleSegment<f64>>,
    pub sensitivity: Vec<ScheduleSegment<f64>>,
    pub carb_ratio: Vec<ScheduleSegment<f64>>,
    pub target: Vec<ScheduleSegment<GlucoseRange>>,
    #[serde(default)]
    pub suspend_threshold: Option<f64>,
    pub max_bolus: f64,
    pub max_basal_rate: f64,
    #[serde(default)]
    pub max_insulin_on_board: Option<f64>,
    #[serde(default)]
    pub included_effects: EffectOptions,
    #[serde(default)]
    pub retrospective_correction: RetrospectiveCorrectionKind,
    #[serde(default)]
    pub insulin_model: InsulinModelPreset,
    #[serde(default)]
    pub carb_absorption_model: CarbAbsorptionModel,
    #[serde(default)]
    pub recommendation_kind: RecommendationKind,
    #[serde(default)]
    pub last_temp_basal: Option<DoseEntry>,
    #[serde(default = "default_basal_schedule_matches_pump")]
    pub basal_schedule_matches_pump: bool,
    #[serde(default)]
    pub automatic_bolus_application_factor: Option<f64>,
    #[serde(default)]
    pub automatic_dosing_threshold: Option<f64>,
    #[serde(default)]
    pub basal_rate_increment: Option<f64>,
    #[serde(default)]
    pub bolus_increment: Option<f64>,
}

fn default_basal_schedule_matches_pump() -> bool {
    true
}

impl LoopAlgorithmInput {
    /// Copy of the input with every glucose-valued field in mg/dL
    pub fn normalized(&self) -> LoopAlgorithmInput {
        let unit = self.glucose_unit;
        let mut input = self.clone();
        if unit == GlucoseUnit::MilligramsPerDeciliter {
            return input;
        }

        for sample in &mut input.glucose_history {
            sample.value = unit.to_mgdl(sample.value);
        }
        for segment in &mut input.sensitivity {
            segment.value = unit.to_mgdl(segment.value);
        }
        for segment in &mut input.target {
            segment.value = GlucoseRange::new(unit.to_mgdl(segment.value.min), unit.to_mgdl(segment.value.max));
        }
        input.suspend_threshold = input.suspend_threshold.map(|v| unit.to_mgdl(v));
        input.automatic_dosing_threshold = input.automatic_dosing_threshold.map(|v| unit.to_mgdl(v));
        input.glucose_unit = GlucoseUnit::MilligramsPerDeciliter;
        input
    }
}
