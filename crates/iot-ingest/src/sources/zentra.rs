//! ZENTRA Cloud readings
//!
//! `get_readings` with `output_format=df` returns a `data` field holding a
//! dataframe. Depending on the API version it arrives as a JSON string in
//! pandas "split" orientation, as a list of records, or as a column dict; all
//! three are normalized into row maps before extraction.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use super::{coerce_value, parse_provider_timestamp, PageRequest, Source, QUERY_DATETIME_FORMAT};
use crate::config::ZentraConfig;
use crate::db::models::{RawReading, Window};
use crate::error::{IngestError, Result};
use crate::transform::AlignMode;

const READINGS_PATH: &str = "/api/v4/get_readings/";

const DATETIME_COLUMN: &str = "datetime";
const SENSOR_COLUMN: &str = "sensor_name";
const MEASUREMENT_COLUMN: &str = "measurement";
const VALUE_COLUMN: &str = "value";

/// A ZENTRA logger identified by its device serial number
pub struct ZentraSource {
    device_sn: String,
    api_key: String,
    config: ZentraConfig,
}

impl ZentraSource {
    pub fn new(device_sn: impl Into<String>, api_key: impl Into<String>, config: ZentraConfig) -> Self {
        Self {
            device_sn: device_sn.into(),
            api_key: api_key.into(),
            config,
        }
    }
}

impl Source for ZentraSource {
    fn name(&self) -> &'static str {
        "zentra"
    }

    fn source_id(&self) -> &str {
        &self.device_sn
    }

    fn table(&self) -> &str {
        &self.config.table
    }

    fn alignment(&self) -> AlignMode {
        self.config.alignment
    }

    fn page_size(&self) -> u32 {
        self.config.page_size
    }

    fn paginated(&self) -> bool {
        true
    }

    fn calibration(&self) -> &BTreeMap<String, f64> {
        &self.config.calibration
    }

    fn page_request(&self, window: &Window, page: u32) -> PageRequest {
        PageRequest {
            path: READINGS_PATH.to_string(),
            query: vec![
                ("device_sn".to_string(), self.device_sn.clone()),
                (
                    "start_date".to_string(),
                    window.start.format(QUERY_DATETIME_FORMAT).to_string(),
                ),
                (
                    "end_date".to_string(),
                    window.end.format(QUERY_DATETIME_FORMAT).to_string(),
                ),
                ("output_format".to_string(), "df".to_string()),
                ("page_num".to_string(), page.to_string()),
                ("per_page".to_string(), self.config.page_size.to_string()),
                ("sort_by".to_string(), "desc".to_string()),
            ],
            headers: vec![("authorization", format!("Token {}", self.api_key))],
        }
    }

    fn parse_page(&self, payload: &Value) -> Result<Vec<RawReading>> {
        let data = payload
            .get("data")
            .ok_or_else(|| IngestError::malformed("'data' not found in ZENTRA response"))?;

        let rows = frame_rows(data)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        if !rows.iter().any(|r| r.contains_key(DATETIME_COLUMN)) {
            return Err(IngestError::malformed(
                "ZENTRA frame has no 'datetime' column",
            ));
        }

        let mut readings = Vec::with_capacity(rows.len());
        let mut invalid_times = 0usize;
        for row in &rows {
            let observed_at = match row
                .get(DATETIME_COLUMN)
                .and_then(|v| parse_provider_timestamp(v, &Utc))
            {
                Some(at) => at,
                None => {
                    invalid_times += 1;
                    continue;
                }
            };

            readings.push(RawReading::new(
                self.device_sn.clone(),
                text_cell(row.get(SENSOR_COLUMN)),
                text_cell(row.get(MEASUREMENT_COLUMN)),
                coerce_value(row.get(VALUE_COLUMN)),
                observed_at,
            ));
        }

        if readings.is_empty() {
            return Err(IngestError::malformed(
                "no ZENTRA row has a valid datetime",
            ));
        }
        if invalid_times > 0 {
            warn!(
                device = %self.device_sn,
                skipped = invalid_times,
                "Skipped ZENTRA rows with invalid datetime values"
            );
        }

        Ok(readings)
    }
}

fn text_cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Normalize a serialized dataframe into row maps
fn frame_rows(data: &Value) -> Result<Vec<Map<String, Value>>> {
    match data {
        Value::String(s) => {
            if s.trim().is_empty() {
                return Ok(Vec::new());
            }
            let inner: Value = serde_json::from_str(s)
                .map_err(|e| IngestError::malformed(format!("ZENTRA data string: {}", e)))?;
            frame_rows(&inner)
        }
        Value::Null => Ok(Vec::new()),
        Value::Array(records) => records
            .iter()
            .map(|r| {
                r.as_object()
                    .cloned()
                    .ok_or_else(|| IngestError::malformed("ZENTRA record is not an object"))
            })
            .collect(),
        Value::Object(obj) if obj.contains_key("columns") && obj.contains_key("data") => {
            split_rows(obj)
        }
        Value::Object(obj) => column_rows(obj),
        other => Err(IngestError::malformed(format!(
            "Unexpected ZENTRA data type: {}",
            json_type(other)
        ))),
    }
}

/// `{"columns": [...], "index": [...], "data": [[...], ...]}`
fn split_rows(obj: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
    let columns: Vec<String> = obj["columns"]
        .as_array()
        .ok_or_else(|| IngestError::malformed("ZENTRA 'columns' is not an array"))?
        .iter()
        .map(|c| match c {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let data = obj["data"]
        .as_array()
        .ok_or_else(|| IngestError::malformed("ZENTRA 'data' is not an array"))?;

    data.iter()
        .map(|row| {
            let cells = row
                .as_array()
                .ok_or_else(|| IngestError::malformed("ZENTRA row is not an array"))?;
            if cells.len() != columns.len() {
                return Err(IngestError::malformed(format!(
                    "ZENTRA row has {} cells for {} columns",
                    cells.len(),
                    columns.len()
                )));
            }
            Ok(columns.iter().cloned().zip(cells.iter().cloned()).collect())
        })
        .collect()
}

/// `{"col": {"0": v, "1": v}}` or `{"col": [v, v]}`
fn column_rows(obj: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
    let mut rows: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    let mut positional: Vec<Map<String, Value>> = Vec::new();

    for (column, cells) in obj {
        match cells {
            Value::Object(by_index) => {
                for (index, cell) in by_index {
                    rows.entry(index_key(index))
                        .or_default()
                        .insert(column.clone(), cell.clone());
                }
            }
            Value::Array(list) => {
                if positional.len() < list.len() {
                    positional.resize_with(list.len(), Map::new);
                }
                for (row, cell) in positional.iter_mut().zip(list) {
                    row.insert(column.clone(), cell.clone());
                }
            }
            other => {
                return Err(IngestError::malformed(format!(
                    "ZENTRA column '{}' is a {}",
                    column,
                    json_type(other)
                )))
            }
        }
    }

    positional.extend(rows.into_values());
    Ok(positional)
}

/// Zero-pad numeric index labels so they sort in row order
fn index_key(index: &str) -> String {
    match index.parse::<u64>() {
        Ok(n) => format!("{:020}", n),
        Err(_) => index.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn source() -> ZentraSource {
        ZentraSource::new("z6-26142", "secret", ZentraConfig::default())
    }

    #[test]
    fn test_page_request() {
        let tz = chrono_tz::America::Chicago;
        let window = Window::new(
            tz.with_ymd_and_hms(2025, 2, 19, 0, 0, 0).unwrap(),
            tz.with_ymd_and_hms(2025, 2, 26, 0, 0, 0).unwrap(),
        );
        let request = source().page_request(&window, 3);

        assert_eq!(request.path, "/api/v4/get_readings/");
        assert!(request
            .query
            .contains(&("start_date".to_string(), "2025-02-19 00:00:00".to_string())));
        assert!(request
            .query
            .contains(&("end_date".to_string(), "2025-02-26 00:00:00".to_string())));
        assert!(request.query.contains(&("page_num".to_string(), "3".to_string())));
        assert!(request.query.contains(&("per_page".to_string(), "2000".to_string())));
        assert_eq!(
            request.headers,
            vec![("authorization", "Token secret".to_string())]
        );
    }

    #[test]
    fn test_parse_split_string() {
        let frame = json!({
            "columns": ["datetime", "sensor_name", "measurement", "value"],
            "index": [0, 1],
            "data": [
                ["2025-02-19 00:05:00-06:00", "ATMOS 41", "Air Temperature", 3.4],
                ["2025-02-19 00:05:00-06:00", "TEROS 12", "Water Content", "0.31"]
            ]
        });
        let payload = json!({ "data": frame.to_string() });

        let readings = source().parse_page(&payload).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor_name, "ATMOS 41");
        assert_eq!(readings[0].measurement_name, "Air Temperature");
        assert_eq!(readings[0].value, Some(3.4));
        assert_eq!(readings[1].value, Some(0.31));
        assert_eq!(
            readings[0].observed_at,
            Utc.with_ymd_and_hms(2025, 2, 19, 6, 5, 0).unwrap()
        );
        assert_eq!(readings[0].source_id, "z6-26142");
    }

    #[test]
    fn test_parse_records() {
        let payload = json!({
            "data": [
                {"datetime": "2025-02-19T06:05:00Z", "sensor_name": "X", "measurement": "temp", "value": 1.0},
                {"datetime": "2025-02-19T07:05:00Z", "sensor_name": "X", "measurement": "temp", "value": null}
            ]
        });
        let readings = source().parse_page(&payload).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].value, None);
    }

    #[test]
    fn test_parse_column_dict() {
        let payload = json!({
            "data": {
                "datetime": {"0": "2025-02-19T06:05:00Z", "10": "2025-02-19T08:05:00Z", "2": "2025-02-19T07:05:00Z"},
                "sensor_name": {"0": "X", "10": "X", "2": "X"},
                "measurement": {"0": "temp", "10": "temp", "2": "temp"},
                "value": {"0": 1.0, "10": 3.0, "2": 2.0}
            }
        });
        let readings = source().parse_page(&payload).unwrap();
        let values: Vec<_> = readings.iter().map(|r| r.value.unwrap()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_frame_ends_pagination() {
        let empty_split = json!({"columns": ["datetime"], "index": [], "data": []});
        for payload in [
            json!({"data": []}),
            json!({"data": empty_split.to_string()}),
            json!({"data": ""}),
        ] {
            assert!(source().parse_page(&payload).unwrap().is_empty());
        }
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let err = source().parse_page(&json!({"detail": "oops"})).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));
    }

    #[test]
    fn test_missing_datetime_column_is_malformed() {
        let payload = json!({"data": [{"sensor_name": "X", "value": 1.0}]});
        let err = source().parse_page(&payload).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_datetime_rows_are_skipped() {
        let payload = json!({
            "data": [
                {"datetime": "garbage", "sensor_name": "X", "measurement": "temp", "value": 1.0},
                {"datetime": "2025-02-19T06:05:00Z", "sensor_name": "X", "measurement": "temp", "value": 2.0}
            ]
        });
        let readings = source().parse_page(&payload).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, Some(2.0));
    }

    #[test]
    fn test_page_without_valid_datetimes_is_malformed() {
        let payload = json!({
            "data": [{"datetime": "garbage", "sensor_name": "X", "measurement": "temp", "value": 1.0}]
        });
        assert!(matches!(
            source().parse_page(&payload),
            Err(IngestError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_ragged_split_row_is_malformed() {
        let payload = json!({
            "data": {"columns": ["datetime", "value"], "index": [0], "data": [["2025-02-19T06:05:00Z"]]}
        });
        assert!(source().parse_page(&payload).is_err());
    }
}
