//! Carbohydrate absorption curves.
//!
//! Each family maps percent of absorption time elapsed to percent of carbs
//! absorbed, with its inverse and instantaneous rate. The inverse and the rate
//! let the carb engine stretch or shrink an entry's absorption window when
//! observed glucose runs ahead of or behind the modeled curve.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::time::minutes;

/// Piecewise model: fraction of absorption time spent rising to the peak rate
pub const PERCENT_END_OF_RISE: f64 = 0.15;

/// Piecewise model: fraction of absorption time after which the rate falls
pub const PERCENT_START_OF_FALL: f64 = 0.5;

/// Carb absorption curve family
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CarbAbsorptionModel {
    /// Constant absorption rate over the whole window
    Linear,
    /// Linear rise, plateau, then linear fall of the absorption rate
    #[default]
    Piecewise,
    /// Rate rises then falls linearly, peaking at mid-window
    Parabolic,
}

impl CarbAbsorptionModel {
    /// Fraction of carbs absorbed after `percent_time` of the absorption window
    pub fn percent_absorbed_at_percent_time(self, percent_time: f64) -> f64 {
        if percent_time <= 0.0 {
            return 0.0;
        }
        if percent_time >= 1.0 {
            return 1.0;
        }

        match self {
            CarbAbsorptionModel::Linear => percent_time,
            CarbAbsorptionModel::Piecewise => {
                let (rise, fall, scale) = piecewise_shape();
                if percent_time < rise {
                    0.5 * scale * percent_time * percent_time / rise
                } else if percent_time < fall {
                    scale * (percent_time - 0.5 * rise)
                } else {
                    let u = percent_time - fall;
                    scale * (fall - 0.5 * rise + u * (1.0 - 0.5 * u / (1.0 - fall)))
                }
            }
            CarbAbsorptionModel::Parabolic => {
                if percent_time <= 0.5 {
                    2.0 * percent_time * percent_time
                } else {
                    -1.0 + 2.0 * percent_time * (2.0 - percent_time)
                }
            }
        }
    }

    /// Fraction of the absorption window needed to absorb `percent_absorbed`
    pub fn percent_time_at_percent_absorbed(self, percent_absorbed: f64) -> f64 {
        if percent_absorbed <= 0.0 {
            return 0.0;
        }
        if percent_absorbed >= 1.0 {
            return 1.0;
        }

        match self {
            CarbAbsorptionModel::Linear => percent_absorbed,
            CarbAbsorptionModel::Piecewise => {
                let (rise, fall, scale) = piecewise_shape();
                if percent_absorbed < 0.5 * scale * rise {
                    (2.0 * rise * percent_absorbed / scale).sqrt()
                } else if percent_absorbed < scale * (fall - 0.5 * rise) {
                    percent_absorbed / scale + 0.5 * rise
                } else {
                    let c = percent_absorbed / scale - fall + 0.5 * rise;
                    let discriminant = (1.0 - 2.0 * c / (1.0 - fall)).max(0.0);
                    fall + (1.0 - fall) * (1.0 - discriminant.sqrt())
                }
            }
            CarbAbsorptionModel::Parabolic => {
                if percent_absorbed <= 0.5 {
                    (percent_absorbed / 2.0).sqrt()
                } else {
                    1.0 - ((1.0 - percent_absorbed) / 2.0).sqrt()
                }
            }
        }
    }

    /// Instantaneous absorption rate, in fraction of total carbs per unit of
    /// percent time
    pub fn percent_rate_at_percent_time(self, percent_time: f64) -> f64 {
        if percent_time <= 0.0 || percent_time > 1.0 {
            return 0.0;
        }

        match self {
            CarbAbsorptionModel::Linear => 1.0,
            CarbAbsorptionModel::Piecewise => {
                let (rise, fall, scale) = piecewise_shape();
                if percent_time < rise {
                    scale * percent_time / rise
                } else if percent_time < fall {
                    scale
                } else {
                    scale * (1.0 - (percent_time - fall) / (1.0 - fall))
                }
            }
            CarbAbsorptionModel::Parabolic => {
                if percent_time <= 0.5 {
                    4.0 * percent_time
                } else {
                    4.0 * (1.0 - percent_time)
                }
            }
        }
    }

    /// Fraction of carbs still to be absorbed `elapsed` into `absorption_time`
    pub fn percent_effect_remaining(self, elapsed: Duration, absorption_time: Duration) -> f64 {
        1.0 - self.percent_absorbed_at_percent_time(percent_time(elapsed, absorption_time))
    }

    /// Grams absorbed from `total` grams `elapsed` into `absorption_time`
    pub fn absorbed_carbs(self, total: f64, elapsed: Duration, absorption_time: Duration) -> f64 {
        total * self.percent_absorbed_at_percent_time(percent_time(elapsed, absorption_time))
    }
}

fn percent_time(elapsed: Duration, absorption_time: Duration) -> f64 {
    let window = minutes(absorption_time);
    if window <= 0.0 {
        return 1.0;
    }
    minutes(elapsed) / window
}

fn piecewise_shape() -> (f64, f64, f64) {
    let scale = 2.0 / (1.0 + PERCENT_START_OF_FALL - PERCENT_END_OF_RISE);
    (PERCENT_END_OF_RISE, PERCENT_START_OF_FALL, scale)
}
