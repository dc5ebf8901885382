//! ThingSpeak channel feeds
//!
//! Each feed entry is one co-located sample: every mapped field yields a
//! reading that shares the entry's `created_at`.

use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde_json::Value;
use tracing::warn;

use super::{coerce_value, parse_provider_timestamp, PageRequest, Source, QUERY_DATETIME_FORMAT};
use crate::config::ThingSpeakConfig;
use crate::db::models::{RawReading, Window};
use crate::error::{IngestError, Result};
use crate::transform::AlignMode;

/// A ThingSpeak channel
pub struct ThingSpeakSource {
    channel_id: String,
    api_key: String,
    timezone: Tz,
    config: ThingSpeakConfig,
}

impl ThingSpeakSource {
    pub fn new(
        channel_id: impl Into<String>,
        api_key: impl Into<String>,
        timezone: Tz,
        config: ThingSpeakConfig,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            api_key: api_key.into(),
            timezone,
            config,
        }
    }
}

impl Source for ThingSpeakSource {
    fn name(&self) -> &'static str {
        "thingspeak"
    }

    fn source_id(&self) -> &str {
        &self.channel_id
    }

    fn table(&self) -> &str {
        &self.config.table
    }

    fn alignment(&self) -> AlignMode {
        self.config.alignment
    }

    fn page_size(&self) -> u32 {
        self.config.results
    }

    /// The feeds endpoint has no paging; one request returns up to `results`
    fn paginated(&self) -> bool {
        false
    }

    fn calibration(&self) -> &BTreeMap<String, f64> {
        &self.config.calibration
    }

    fn page_request(&self, window: &Window, _page: u32) -> PageRequest {
        PageRequest {
            path: format!("/channels/{}/feeds.json", self.channel_id),
            query: vec![
                ("api_key".to_string(), self.api_key.clone()),
                (
                    "start".to_string(),
                    window.start.format(QUERY_DATETIME_FORMAT).to_string(),
                ),
                (
                    "end".to_string(),
                    window.end.format(QUERY_DATETIME_FORMAT).to_string(),
                ),
                ("results".to_string(), self.config.results.to_string()),
                ("timezone".to_string(), self.timezone.name().to_string()),
            ],
            headers: Vec::new(),
        }
    }

    fn parse_page(&self, payload: &Value) -> Result<Vec<RawReading>> {
        let feeds = match payload.get("feeds") {
            Some(Value::Array(feeds)) => feeds,
            Some(Value::Null) => return Ok(Vec::new()),
            Some(_) => return Err(IngestError::malformed("ThingSpeak 'feeds' is not an array")),
            None => {
                // ThingSpeak answers an unknown channel or bad key with `-1`
                return Err(IngestError::malformed(
                    "'feeds' not found in ThingSpeak response",
                ));
            }
        };

        let mut readings = Vec::with_capacity(feeds.len() * self.config.fields.len());
        let mut invalid_times = 0usize;
        for entry in feeds {
            let observed_at = match entry
                .get("created_at")
                .and_then(|v| parse_provider_timestamp(v, &self.timezone))
            {
                Some(at) => at,
                None => {
                    invalid_times += 1;
                    continue;
                }
            };

            for (field, sensor) in &self.config.fields {
                readings.push(RawReading::new(
                    self.channel_id.clone(),
                    sensor.clone(),
                    "",
                    coerce_value(entry.get(field)),
                    observed_at,
                ));
            }
        }

        if !feeds.is_empty() && invalid_times == feeds.len() {
            return Err(IngestError::malformed(
                "no ThingSpeak entry has a valid created_at",
            ));
        }
        if invalid_times > 0 {
            warn!(
                channel = %self.channel_id,
                skipped = invalid_times,
                "Skipped ThingSpeak entries with invalid created_at"
            );
        }

        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn source() -> ThingSpeakSource {
        ThingSpeakSource::new(
            "2489769",
            "readkey",
            chrono_tz::America::Chicago,
            ThingSpeakConfig::default(),
        )
    }

    #[test]
    fn test_page_request() {
        let tz = chrono_tz::America::Chicago;
        let window = Window::new(
            tz.with_ymd_and_hms(2024, 10, 31, 0, 6, 0).unwrap(),
            tz.with_ymd_and_hms(2024, 11, 7, 0, 6, 0).unwrap(),
        );
        let request = source().page_request(&window, 1);

        assert_eq!(request.path, "/channels/2489769/feeds.json");
        assert!(request.query.contains(&("api_key".to_string(), "readkey".to_string())));
        assert!(request
            .query
            .contains(&("start".to_string(), "2024-10-31 00:06:00".to_string())));
        assert!(request.query.contains(&("results".to_string(), "8000".to_string())));
        assert!(request
            .query
            .contains(&("timezone".to_string(), "America/Chicago".to_string())));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_parse_feeds() {
        let payload = json!({
            "channel": {"id": 2489769},
            "feeds": [
                {"created_at": "2024-10-31T00:10:00-05:00", "entry_id": 1, "field1": "1.50", "field2": "-0.25"},
                {"created_at": "2024-10-31T00:25:00-05:00", "entry_id": 2, "field1": "nan", "field2": null}
            ]
        });
        let readings = source().parse_page(&payload).unwrap();
        assert_eq!(readings.len(), 4);

        let first_at = Utc.with_ymd_and_hms(2024, 10, 31, 5, 10, 0).unwrap();
        assert_eq!(readings[0], RawReading::new("2489769", "Pitch", "", Some(1.5), first_at));
        assert_eq!(readings[1], RawReading::new("2489769", "Roll", "", Some(-0.25), first_at));
        assert_eq!(readings[2].value, None);
        assert_eq!(readings[3].value, None);
    }

    #[test]
    fn test_empty_feeds() {
        let payload = json!({"channel": {}, "feeds": []});
        assert!(source().parse_page(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_feed_without_valid_created_at_is_malformed() {
        let payload = json!({"feeds": [
            {"created_at": "not a date", "field1": "1.0", "field2": "2.0"},
            {"created_at": null, "field1": "1.5", "field2": "2.5"}
        ]});
        let err = source().parse_page(&payload).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));
    }

    #[test]
    fn test_missing_feeds_is_malformed() {
        let err = source().parse_page(&json!(-1)).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));
    }

    #[test]
    fn test_not_paginated() {
        assert!(!source().paginated());
        assert_eq!(source().page_size(), 8000);
    }
}
