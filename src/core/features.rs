//! Feature derivation from raw datalog rows.
//!
//! The classifier does not consume raw rows directly: each row is expanded
//! with duration columns converted to seconds, calendar components of the
//! sample timestamp, sealing-temperature differentials, and counter deltas
//! against the previous sample.

use crate::db::MachineReading;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

/// Every feature name resolvable through [`FeatureRow::feature`], in the
/// order used for canonical row encodings.
pub const FEATURE_NAMES: [&str; 23] = [
    "status_code",
    "speed_rpm",
    "counter_output",
    "counter_reject",
    "availability",
    "performance",
    "quality",
    "oee",
    "seal_temp_vertical_upper",
    "seal_temp_vertical_lower",
    "seal_temp_horizontal_front",
    "seal_temp_horizontal_rear",
    "downtime_secs",
    "output_time_secs",
    "total_time_secs",
    "day",
    "hour",
    "minute",
    "diff_seal_vertical",
    "diff_seal_horizontal",
    "net_output",
    "output_delta",
    "reject_delta",
];

/// One engineered feature row, derived from a [`MachineReading`].
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    pub times: NaiveDateTime,

    // Raw values carried through for the model
    pub status_code: f64,
    pub speed_rpm: f64,
    pub counter_output: f64,
    pub counter_reject: f64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub seal_temp_vertical_upper: f64,
    pub seal_temp_vertical_lower: f64,
    pub seal_temp_horizontal_front: f64,
    pub seal_temp_horizontal_rear: f64,

    // Duration columns in seconds
    pub downtime_secs: f64,
    pub output_time_secs: f64,
    pub total_time_secs: f64,

    // Calendar components of the sample timestamp
    pub day: f64,
    pub hour: f64,
    pub minute: f64,

    // Differentials
    pub diff_seal_vertical: f64,
    pub diff_seal_horizontal: f64,
    pub net_output: f64,
    pub output_delta: f64,
    pub reject_delta: f64,
}

/// Parse an `hh:mm:ss` duration into seconds.
///
/// Hours may exceed 23; the machine accumulates run time across shifts.
pub fn parse_hms(value: &str) -> Option<i64> {
    let mut parts = value.trim().splitn(3, ':');
    let h: i64 = parts.next()?.trim().parse().ok()?;
    let m: i64 = parts.next()?.trim().parse().ok()?;
    let s: i64 = parts.next()?.trim().parse().ok()?;

    if !(0..60).contains(&m) || !(0..60).contains(&s) || h < 0 {
        return None;
    }

    Some(h * 3600 + m * 60 + s)
}

/// Seconds for a duration column, malformed values degrading to zero.
fn hms_or_zero(value: &str) -> f64 {
    parse_hms(value).unwrap_or(0) as f64
}

/// Derive feature rows from raw readings.
///
/// Rows are reordered chronologically before the counter deltas are taken,
/// so the result is oldest first and the first row's deltas are zero.
pub fn preprocess(readings: &[MachineReading]) -> Vec<FeatureRow> {
    let mut ordered: Vec<&MachineReading> = readings.iter().collect();
    ordered.sort_by_key(|r| r.times);

    let mut rows = Vec::with_capacity(ordered.len());
    let mut previous: Option<&MachineReading> = None;

    for reading in ordered {
        let output_delta = previous
            .map(|p| (reading.counter_output - p.counter_output) as f64)
            .unwrap_or(0.0);
        let reject_delta = previous
            .map(|p| (reading.counter_reject - p.counter_reject) as f64)
            .unwrap_or(0.0);

        rows.push(FeatureRow {
            times: reading.times,
            status_code: reading.status_code as f64,
            speed_rpm: reading.speed_rpm,
            counter_output: reading.counter_output as f64,
            counter_reject: reading.counter_reject as f64,
            availability: reading.availability,
            performance: reading.performance,
            quality: reading.quality,
            oee: reading.oee,
            seal_temp_vertical_upper: reading.seal_temp_vertical_upper,
            seal_temp_vertical_lower: reading.seal_temp_vertical_lower,
            seal_temp_horizontal_front: reading.seal_temp_horizontal_front,
            seal_temp_horizontal_rear: reading.seal_temp_horizontal_rear,
            downtime_secs: hms_or_zero(&reading.downtime),
            output_time_secs: hms_or_zero(&reading.output_time),
            total_time_secs: hms_or_zero(&reading.total_time),
            day: reading.times.day() as f64,
            hour: reading.times.hour() as f64,
            minute: reading.times.minute() as f64,
            diff_seal_vertical: reading.seal_temp_vertical_upper
                - reading.seal_temp_vertical_lower,
            diff_seal_horizontal: reading.seal_temp_horizontal_front
                - reading.seal_temp_horizontal_rear,
            net_output: (reading.counter_output - reading.counter_reject) as f64,
            output_delta,
            reject_delta,
        });

        previous = Some(reading);
    }

    rows
}

impl FeatureRow {
    /// Resolve a feature by its artifact name.
    ///
    /// The classifier artifact carries its own feature ordering; this keeps
    /// the model decoupled from the struct layout.
    pub fn feature(&self, name: &str) -> Option<f64> {
        let value = match name {
            "status_code" => self.status_code,
            "speed_rpm" => self.speed_rpm,
            "counter_output" => self.counter_output,
            "counter_reject" => self.counter_reject,
            "availability" => self.availability,
            "performance" => self.performance,
            "quality" => self.quality,
            "oee" => self.oee,
            "seal_temp_vertical_upper" => self.seal_temp_vertical_upper,
            "seal_temp_vertical_lower" => self.seal_temp_vertical_lower,
            "seal_temp_horizontal_front" => self.seal_temp_horizontal_front,
            "seal_temp_horizontal_rear" => self.seal_temp_horizontal_rear,
            "downtime_secs" => self.downtime_secs,
            "output_time_secs" => self.output_time_secs,
            "total_time_secs" => self.total_time_secs,
            "day" => self.day,
            "hour" => self.hour,
            "minute" => self.minute,
            "diff_seal_vertical" => self.diff_seal_vertical,
            "diff_seal_horizontal" => self.diff_seal_horizontal,
            "net_output" => self.net_output,
            "output_delta" => self.output_delta,
            "reject_delta" => self.reject_delta,
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn make_reading(offset_min: i64, output: i64, reject: i64) -> MachineReading {
        let base = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        MachineReading {
            times: base + chrono::Duration::minutes(offset_min),
            status_code: 2,
            speed_rpm: 65.0,
            counter_output: output,
            counter_reject: reject,
            availability: 92.0,
            performance: 81.0,
            quality: 98.5,
            oee: 73.4,
            seal_temp_vertical_upper: 182.0,
            seal_temp_vertical_lower: 176.5,
            seal_temp_horizontal_front: 191.0,
            seal_temp_horizontal_rear: 188.0,
            downtime: "00:12:30".to_string(),
            output_time: "05:40:00".to_string(),
            total_time: "06:00:00".to_string(),
        }
    }

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:12:30"), Some(750));
        assert_eq!(parse_hms("26:00:05"), Some(93605));
        assert_eq!(parse_hms("1:2:3"), Some(3723));
        assert_eq!(parse_hms("00:61:00"), None);
        assert_eq!(parse_hms("garbage"), None);
        assert_eq!(parse_hms(""), None);
    }

    #[test]
    fn test_preprocess_orders_chronologically() {
        // Loader returns newest first; deltas must still be taken forward in time.
        let readings = vec![
            make_reading(10, 1200, 24),
            make_reading(5, 1100, 22),
            make_reading(0, 1000, 20),
        ];

        let rows = preprocess(&readings);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].times < rows[1].times && rows[1].times < rows[2].times);

        assert_eq!(rows[0].output_delta, 0.0);
        assert_eq!(rows[0].reject_delta, 0.0);
        assert_eq!(rows[1].output_delta, 100.0);
        assert_eq!(rows[2].output_delta, 100.0);
        assert_eq!(rows[2].reject_delta, 2.0);
    }

    #[test]
    fn test_engineered_columns() {
        let rows = preprocess(&[make_reading(0, 1000, 20)]);
        let row = &rows[0];

        assert_eq!(row.downtime_secs, 750.0);
        assert_eq!(row.output_time_secs, 20400.0);
        assert_eq!(row.total_time_secs, 21600.0);
        assert_eq!(row.day, 4.0);
        assert_eq!(row.hour, 8.0);
        assert_eq!(row.minute, 15.0);
        assert!((row.diff_seal_vertical - 5.5).abs() < 1e-9);
        assert!((row.diff_seal_horizontal - 3.0).abs() < 1e-9);
        assert_eq!(row.net_output, 980.0);
    }

    #[test]
    fn test_malformed_duration_degrades_to_zero() {
        let mut reading = make_reading(0, 1000, 20);
        reading.downtime = "n/a".to_string();
        let rows = preprocess(&[reading]);
        assert_eq!(rows[0].downtime_secs, 0.0);
    }

    #[test]
    fn test_feature_lookup() {
        let rows = preprocess(&[make_reading(0, 1000, 20)]);
        let row = &rows[0];

        assert_eq!(row.feature("oee"), Some(73.4));
        assert_eq!(row.feature("net_output"), Some(980.0));
        assert_eq!(row.feature("not_a_feature"), None);
    }

    #[test]
    fn test_feature_names_all_resolve() {
        let rows = preprocess(&[make_reading(0, 1000, 20)]);
        for name in FEATURE_NAMES {
            assert!(rows[0].feature(name).is_some(), "unresolvable: {name}");
        }
    }
}
