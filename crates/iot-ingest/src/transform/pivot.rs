//! Long-to-wide reshaping of aligned readings

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::warn;

use crate::db::models::{AlignedReading, WideRow};
use crate::error::{IngestError, Result};

/// Wide rows plus what was left out building them
#[derive(Debug, Clone, PartialEq)]
pub struct PivotResult {
    /// Ordered by timestamp
    pub rows: Vec<WideRow>,
    /// Every column of the batch, sorted
    pub columns: Vec<String>,
    /// Readings without a sensor name or a numeric value
    pub dropped: usize,
}

/// Column name for a sensor/measurement pair, whitespace runs collapsed to `_`
pub fn column_name(sensor: &str, measurement: &str, separator: &str) -> String {
    let joined = if measurement.trim().is_empty() {
        sensor.to_string()
    } else {
        format!("{}{}{}", sensor, separator, measurement)
    };
    joined.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Round to two decimal places, exact halves to the even digit
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Pivot aligned readings into one row per timestamp.
///
/// Values that collide on the same timestamp and column are averaged, then
/// rounded to two decimals. Every row carries every column of the batch;
/// combinations without a reading are `None`.
pub fn pivot(readings: &[AlignedReading], separator: &str) -> Result<PivotResult> {
    // Keyed by lowercased name; SQLite column names ignore case
    let mut owners: BTreeMap<String, (String, (String, String))> = BTreeMap::new();
    let mut groups: BTreeMap<DateTime<Tz>, BTreeMap<String, (f64, usize)>> = BTreeMap::new();
    let mut dropped = 0usize;

    for reading in readings {
        let sensor = reading.sensor_name.trim();
        let value = match reading.value {
            Some(v) if v.is_finite() && !sensor.is_empty() => v,
            _ => {
                dropped += 1;
                continue;
            }
        };
        let measurement = reading.measurement_name.trim();
        let column = column_name(sensor, measurement, separator);

        let pair = (sensor.to_string(), measurement.to_string());
        match owners.get(&column.to_ascii_lowercase()) {
            Some((_, owner)) if *owner != pair => {
                return Err(IngestError::ColumnCollision {
                    column,
                    first: format!("{}/{}", owner.0, owner.1),
                    second: format!("{}/{}", pair.0, pair.1),
                });
            }
            Some(_) => {}
            None => {
                owners.insert(column.to_ascii_lowercase(), (column.clone(), pair));
            }
        }

        let cell = groups
            .entry(reading.timestamp)
            .or_default()
            .entry(column)
            .or_insert((0.0, 0));
        cell.0 += value;
        cell.1 += 1;
    }

    if dropped > 0 {
        warn!(dropped, "Dropped readings without sensor name or numeric value");
    }

    let columns: BTreeSet<String> = owners.into_values().map(|(column, _)| column).collect();
    let rows = groups
        .into_iter()
        .map(|(timestamp, cells)| {
            let values = columns
                .iter()
                .map(|column| {
                    let value = cells
                        .get(column)
                        .map(|(sum, count)| round2(sum / *count as f64));
                    (column.clone(), value)
                })
                .collect();
            WideRow { timestamp, values }
        })
        .collect();

    Ok(PivotResult {
        rows,
        columns: columns.into_iter().collect(),
        dropped,
    })
}
