//! Temporal alignment onto the canonical hour grid

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::db::models::{AlignedReading, RawReading};

/// How readings are placed on hour boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    /// One source instant per boundary, the one nearest to it
    #[default]
    Nearest,
    /// Every reading keeps its value under the floor of its hour
    FloorHour,
}

/// Truncate to the top of the hour in the timestamp's own zone
pub fn floor_hour<Z: TimeZone>(dt: &DateTime<Z>) -> DateTime<Z> {
    let into_hour = Duration::seconds(i64::from(dt.minute()) * 60 + i64::from(dt.second()))
        + Duration::nanoseconds(i64::from(dt.nanosecond() % 1_000_000_000));
    dt.clone() - into_hour
}

/// Every hour boundary from `floor(first)` to `floor(last)` inclusive
pub fn hour_grid(first: DateTime<Tz>, last: DateTime<Tz>) -> Vec<DateTime<Tz>> {
    let start = floor_hour(&first);
    let end = floor_hour(&last);

    let mut grid = Vec::new();
    let mut boundary = start;
    while boundary <= end {
        grid.push(boundary);
        boundary += Duration::hours(1);
    }
    grid
}

/// Place readings on the hour grid of `tz`
pub fn align(readings: &[RawReading], tz: Tz, mode: AlignMode) -> Vec<AlignedReading> {
    match mode {
        AlignMode::Nearest => align_nearest(readings, tz),
        AlignMode::FloorHour => readings
            .iter()
            .map(|r| AlignedReading::from_raw(r, floor_hour(&r.observed_at.with_timezone(&tz))))
            .collect(),
    }
}

/// For each boundary pick the observation instant with the smallest distance
/// to it, across all sensors; equal distances go to the earlier instant.
/// Every reading observed at the chosen instant is emitted for the boundary.
fn align_nearest(readings: &[RawReading], tz: Tz) -> Vec<AlignedReading> {
    let mut by_instant: BTreeMap<DateTime<Utc>, Vec<&RawReading>> = BTreeMap::new();
    for reading in readings {
        by_instant.entry(reading.observed_at).or_default().push(reading);
    }

    let instants: Vec<DateTime<Utc>> = by_instant.keys().copied().collect();
    let (Some(first), Some(last)) = (instants.first(), instants.last()) else {
        return Vec::new();
    };

    let grid = hour_grid(first.with_timezone(&tz), last.with_timezone(&tz));
    let mut aligned = Vec::with_capacity(grid.len());

    for boundary in grid {
        let target = boundary.with_timezone(&Utc);
        let chosen = nearest_instant(&instants, target);
        for reading in &by_instant[&chosen] {
            aligned.push(AlignedReading::from_raw(reading, boundary));
        }
    }

    aligned
}

/// `instants` must be sorted and non-empty
fn nearest_instant(instants: &[DateTime<Utc>], target: DateTime<Utc>) -> DateTime<Utc> {
    let idx = instants.partition_point(|t| *t < target);
    let before = idx.checked_sub(1).map(|i| instants[i]);
    let after = instants.get(idx).copied();

    match (before, after) {
        (Some(b), Some(a)) => {
            if target - b <= a - target {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => unreachable!("nearest_instant called with no instants"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn reading(sensor: &str, value: f64, observed_at: DateTime<Utc>) -> RawReading {
        RawReading::new("dev", sensor, "temp", Some(value), observed_at)
    }

    #[test]
    fn test_empty_input() {
        assert!(align(&[], chrono_tz::UTC, AlignMode::Nearest).is_empty());
        assert!(align(&[], chrono_tz::UTC, AlignMode::FloorHour).is_empty());
    }

    #[test]
    fn test_nearest_scenario() {
        let readings = vec![
            reading("X", 20.1, at(10, 58)),
            reading("X", 20.5, at(11, 3)),
            reading("X", 21.0, at(11, 59)),
        ];
        let aligned = align(&readings, chrono_tz::UTC, AlignMode::Nearest);

        // Grid runs floor(10:58) = 10:00 through floor(11:59) = 11:00
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].timestamp.with_timezone(&Utc), at(10, 0));
        assert_eq!(aligned[0].original_at, at(10, 58));
        assert_eq!(aligned[1].timestamp.with_timezone(&Utc), at(11, 0));
        assert_eq!(aligned[1].original_at, at(10, 58));
        assert_eq!(aligned[1].value, Some(20.1));
    }

    #[test]
    fn test_one_instant_per_boundary() {
        let readings: Vec<_> = [(0, 7), (0, 41), (1, 2), (2, 55), (4, 30), (4, 31), (6, 10)]
            .iter()
            .map(|&(h, m)| reading("X", 1.0, at(h, m)))
            .collect();
        let aligned = align(&readings, chrono_tz::UTC, AlignMode::Nearest);

        let boundaries: Vec<_> = aligned.iter().map(|a| a.timestamp).collect();
        let expected = hour_grid(at(0, 7).with_timezone(&chrono_tz::UTC), at(6, 10).with_timezone(&chrono_tz::UTC));
        assert_eq!(boundaries, expected);
        assert_eq!(boundaries.len(), 7);
    }

    #[test]
    fn test_tie_goes_to_earlier_reading() {
        let readings = vec![reading("X", 2.0, at(11, 30)), reading("X", 1.0, at(10, 30))];
        for _ in 0..3 {
            let aligned = align(&readings, chrono_tz::UTC, AlignMode::Nearest);
            let eleven = aligned
                .iter()
                .find(|a| a.timestamp.with_timezone(&Utc) == at(11, 0))
                .unwrap();
            assert_eq!(eleven.original_at, at(10, 30));
            assert_eq!(eleven.value, Some(1.0));
        }
    }

    #[test]
    fn test_selection_is_global_and_keeps_colocated_readings() {
        let readings = vec![
            reading("A", 1.0, at(9, 55)),
            reading("B", 2.0, at(9, 55)),
            reading("A", 3.0, at(10, 20)),
        ];
        let aligned = align(&readings, chrono_tz::UTC, AlignMode::Nearest);

        assert_eq!(aligned.len(), 4);
        let ten: Vec<_> = aligned
            .iter()
            .filter(|a| a.timestamp.with_timezone(&Utc) == at(10, 0))
            .collect();
        assert_eq!(ten.len(), 2);
        assert!(ten.iter().all(|a| a.original_at == at(9, 55)));
    }

    #[test]
    fn test_grid_preserves_timezone() {
        let readings = vec![reading("X", 1.0, at(16, 45)), reading("X", 2.0, at(17, 10))];
        let aligned = align(&readings, Chicago, AlignMode::Nearest);

        assert_eq!(aligned[0].timestamp.timezone(), Chicago);
        assert_eq!(aligned[0].timestamp.format("%H:%M").to_string(), "10:00");
        assert_eq!(aligned[1].timestamp.format("%H:%M").to_string(), "11:00");
    }

    #[test]
    fn test_floor_in_half_hour_zone() {
        let kolkata = chrono_tz::Asia::Kolkata;
        // 10:20 UTC is 15:50 IST
        let floored = floor_hour(&at(10, 20).with_timezone(&kolkata));
        assert_eq!(floored.format("%H:%M").to_string(), "15:00");
        assert_eq!(floored.with_timezone(&Utc), at(9, 30));
    }

    #[test]
    fn test_grid_across_dst_change() {
        // Chicago springs forward at 2025-03-09 02:00 local (08:00 UTC)
        let first = Utc.with_ymd_and_hms(2025, 3, 9, 7, 10, 0).unwrap().with_timezone(&Chicago);
        let last = Utc.with_ymd_and_hms(2025, 3, 9, 9, 10, 0).unwrap().with_timezone(&Chicago);
        let grid: Vec<_> = hour_grid(first, last)
            .iter()
            .map(|b| b.format("%H:%M").to_string())
            .collect();
        assert_eq!(grid, vec!["01:00", "03:00", "04:00"]);
    }

    #[test]
    fn test_floor_mode_keeps_every_reading() {
        let readings = vec![reading("X", 1.0, at(10, 5)), reading("X", 2.0, at(10, 50))];
        let aligned = align(&readings, chrono_tz::UTC, AlignMode::FloorHour);
        assert_eq!(aligned.len(), 2);
        assert!(aligned.iter().all(|a| a.timestamp.with_timezone(&Utc) == at(10, 0)));
    }
}
