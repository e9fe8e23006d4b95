#![forbid(unsafe_code)]

//! Core domain model and forecasting logic for the loopctl dosing engine.
//!
//! This crate provides:
//! - Domain types (glucose, doses, carbs, schedules, recommendations)
//! - Insulin and carb absorption models
//! - Effect curves (insulin, counteraction, carbs, retrospective, momentum)
//! - Glucose forecasting and the correction decision
//! - Dose translation with delivery limits and continuation rules
//! - Configuration, logging and CSV export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod time;
pub mod schedule;
pub mod insulin;
pub mod absorption;
pub mod dose;
pub mod counteraction;
pub mod carbs;
pub mod retrospective;
pub mod momentum;
pub mod prediction;
pub mod correction;
pub mod dosing;
pub mod engine;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{AlgorithmSettings, Config};
pub use schedule::{ScheduleLookup, ScheduleSegment};
pub use insulin::{ExponentialInsulinModel, InsulinModel, InsulinModelPreset};
pub use absorption::CarbAbsorptionModel;
pub use correction::{insulin_correction, InsulinCorrection};
pub use prediction::{generate_prediction, predict_glucose};
pub use engine::{predict, run, LoopAlgorithmOutput, LoopRecommendation};
pub use export::write_prediction_csv;
