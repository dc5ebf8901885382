//! Provider adapters
//!
//! A [`Source`] knows how to ask its provider for one page of a window and how
//! to turn the response payload into [`RawReading`]s. Transport, retries and
//! pagination live in the fetcher; everything provider-specific lives here.

pub mod thingspeak;
pub mod zentra;

pub use thingspeak::ThingSpeakSource;
pub use zentra::ZentraSource;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::db::models::{RawReading, Window};
use crate::error::Result;
use crate::transform::AlignMode;

/// Format used for window bounds in provider query strings
pub(crate) const QUERY_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One HTTP GET, relative to the client's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Lowercase header names
    pub headers: Vec<(&'static str, String)>,
}

/// A telemetry provider
pub trait Source {
    /// Short provider name used in logs and the run ledger
    fn name(&self) -> &'static str;

    /// Device serial or channel id
    fn source_id(&self) -> &str;

    /// Table the provider's rows are stored in
    fn table(&self) -> &str;

    fn alignment(&self) -> AlignMode;

    /// Results per page; a page this full may have been truncated
    fn page_size(&self) -> u32;

    /// Whether further pages exist after a non-empty one
    fn paginated(&self) -> bool;

    /// Additive offsets per sensor name
    fn calibration(&self) -> &BTreeMap<String, f64>;

    /// Request for page `page` (1-based) of `window`
    fn page_request(&self, window: &Window, page: u32) -> PageRequest;

    /// Parse a successful response body. An empty vector ends pagination.
    fn parse_page(&self, payload: &serde_json::Value) -> Result<Vec<RawReading>>;
}

/// Add the configured offset to every reading of a calibrated sensor
pub fn apply_calibration(readings: &mut [RawReading], calibration: &BTreeMap<String, f64>) {
    if calibration.is_empty() {
        return;
    }
    for reading in readings.iter_mut() {
        if let (Some(offset), Some(value)) =
            (calibration.get(&reading.sensor_name), reading.value.as_mut())
        {
            *value += offset;
        }
    }
}

/// Parse a provider timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` with or without an offset, and
/// epoch milliseconds. Naive values are taken to be in `naive_tz`.
pub(crate) fn parse_provider_timestamp<Tz: TimeZone>(
    value: &serde_json::Value,
    naive_tz: &Tz,
) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        serde_json::Value::String(s) => parse_timestamp_str(s.trim(), naive_tz),
        _ => None,
    }
}

fn parse_timestamp_str<Tz: TimeZone>(s: &str, naive_tz: &Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return naive_tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

/// Interpret a JSON cell as a number, coercing numeric strings
pub(crate) fn coerce_value(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
