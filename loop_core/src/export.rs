//! CSV export of a forecast and its effect curves.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::engine::LoopAlgorithmOutput;
use crate::{GlucoseUnit, Result};

/// A row in the CSV output
#[derive(Debug, Default, serde::Serialize)]
struct CsvRow {
    timestamp: String,
    unit: &'static str,
    forecast: Option<f64>,
    insulin: Option<f64>,
    carbs: Option<f64>,
    retrospective_correction: Option<f64>,
    momentum: Option<f64>,
}

/// Write one row per timestamp across the forecast and effect curves
///
/// Values are converted to `unit`. Curves that have no point at a timestamp
/// leave that cell empty.
pub fn write_prediction<W: Write>(output: &LoopAlgorithmOutput, unit: GlucoseUnit, writer: W) -> Result<usize> {
    let mut rows: BTreeMap<DateTime<Utc>, CsvRow> = BTreeMap::new();
    for point in &output.prediction {
        row_at(&mut rows, point.timestamp, unit).forecast = Some(unit.from_mgdl(point.value));
    }

    let effects = &output.effects;
    for effect in &effects.insulin {
        row_at(&mut rows, effect.timestamp, unit).insulin = Some(unit.from_mgdl(effect.value));
    }
    for effect in &effects.carbs {
        row_at(&mut rows, effect.timestamp, unit).carbs = Some(unit.from_mgdl(effect.value));
    }
    for effect in &effects.retrospective_correction {
        row_at(&mut rows, effect.timestamp, unit).retrospective_correction = Some(unit.from_mgdl(effect.value));
    }
    for effect in &effects.momentum {
        row_at(&mut rows, effect.timestamp, unit).momentum = Some(unit.from_mgdl(effect.value));
    }

    let mut writer = csv::Writer::from_writer(writer);
    let count = rows.len();
    for row in rows.into_values() {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(count)
}

fn row_at(rows: &mut BTreeMap<DateTime<Utc>, CsvRow>, timestamp: DateTime<Utc>, unit: GlucoseUnit) -> &mut CsvRow {
    rows.entry(timestamp).or_insert_with(|| CsvRow {
        timestamp: timestamp.to_rfc3339(),
        unit: unit.label(),
        ..CsvRow::default()
    })
}

/// Write the forecast CSV to `path`, creating parent directories as needed
pub fn write_prediction_csv(output: &LoopAlgorithmOutput, unit: GlucoseUnit, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let count = write_prediction(output, unit, &file)?;
    file.sync_all()?;

    tracing::info!("Wrote {} forecast rows to {:?}", count, path);
    Ok(count)
}
