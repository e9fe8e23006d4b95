//! Short-horizon glucose momentum.

use chrono::Duration;

use crate::config::MomentumSettings;
use crate::time::{minutes, simulation_dates};
use crate::{GlucoseEffect, GlucoseSample};

/// Linear projection of the most recent glucose trend
///
/// Uses the samples within `data_interval` of the latest reading. Returns an
/// empty curve when there are fewer than three of them or when they are not
/// continuous (their span must be under `continuity_interval x count`).
pub fn momentum_effect(glucose: &[GlucoseSample], settings: &MomentumSettings, delta: Duration) -> Vec<GlucoseEffect> {
    let Some(last) = glucose.last() else {
        return Vec::new();
    };

    let window_start = last.timestamp - settings.data_interval;
    let recent: Vec<&GlucoseSample> = glucose.iter().filter(|s| s.timestamp >= window_start).collect();
    if recent.len() <= 2 {
        return Vec::new();
    }

    let span = (last.timestamp - recent[0].timestamp).abs();
    if minutes(span) >= minutes(settings.continuity_interval) * recent.len() as f64 {
        tracing::warn!("Glucose data is not continuous, skipping momentum");
        return Vec::new();
    }

    let Some(slope) = regression_slope(&recent) else {
        return Vec::new();
    };

    simulation_dates(last.timestamp, last.timestamp + settings.duration, delta)
        .into_iter()
        .map(|date| {
            let elapsed = minutes(date - last.timestamp).max(0.0);
            GlucoseEffect::new(date, elapsed * slope)
        })
        .collect()
}

/// Least-squares slope in mg/dL per minute
fn regression_slope(samples: &[&GlucoseSample]) -> Option<f64> {
    let origin = samples.first()?.timestamp;
    let n = samples.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for sample in samples {
        let x = minutes(sample.timestamp - origin);
        sum_x += x;
        sum_y += sample.value;
        sum_xy += x * sample.value;
        sum_xx += x * x;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    slope.is_finite().then_some(slope)
}
