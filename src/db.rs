//! Database access for the machine datalog.
//!
//! The packaging line writes one row per sampling tick into a single MySQL
//! table. This module owns the connection pool, the row mapping, and the two
//! time-windowed loaders the dashboard uses, with short TTL caches in front
//! so repeated API hits within a refresh period do not re-query the database.

use crate::cache::TtlCache;
use crate::config::Config;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// One row of the machine datalog.
///
/// Column names follow the PLC export schema; the SELECT list aliases them to
/// the field names here.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MachineReading {
    pub times: NaiveDateTime,
    pub status_code: i32,
    pub speed_rpm: f64,
    pub counter_output: i64,
    pub counter_reject: i64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub seal_temp_vertical_upper: f64,
    pub seal_temp_vertical_lower: f64,
    pub seal_temp_horizontal_front: f64,
    pub seal_temp_horizontal_rear: f64,
    pub downtime: String,
    pub output_time: String,
    pub total_time: String,
}

/// SELECT list mapping the PLC column names onto [`MachineReading`] fields.
///
/// The trailing space in `Belakang/Kiri (oC )` is present in the upstream
/// schema.
const COLUMNS: &str = "`times` AS times, \
    `Status` AS status_code, \
    `Speed(rpm)` AS speed_rpm, \
    `Counter Output (pack)` AS counter_output, \
    `Counter Reject (pack)` AS counter_reject, \
    `Availability(%)` AS availability, \
    `Performance(%)` AS performance, \
    `Quality(%)` AS quality, \
    `OEE(%)` AS oee, \
    `Suhu Sealing Vertical Atas (oC)` AS seal_temp_vertical_upper, \
    `Suhu Sealing Vertikal Bawah (oC)` AS seal_temp_vertical_lower, \
    `Suhu Sealing Horizontal Depan/Kanan (oC)` AS seal_temp_horizontal_front, \
    `Suhu Sealing Horizontal Belakang/Kiri (oC )` AS seal_temp_horizontal_rear, \
    `Downtime (hh:mm:ss)` AS downtime, \
    `Output Time (hh:mm:ss)` AS output_time, \
    `Total Time (hh:mm:ss)` AS total_time";

/// Historical window selection for trend queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "6h")]
    Last6Hours,
    #[serde(rename = "24h")]
    Last24Hours,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::Last24Hours
    }
}

impl TimeRange {
    /// The SQL interval expression for this window.
    pub fn interval_sql(&self) -> &'static str {
        match self {
            TimeRange::LastHour => "INTERVAL 1 HOUR",
            TimeRange::Last6Hours => "INTERVAL 6 HOUR",
            TimeRange::Last24Hours => "INTERVAL 1 DAY",
            TimeRange::Last7Days => "INTERVAL 7 DAY",
            TimeRange::Last30Days => "INTERVAL 30 DAY",
        }
    }

    /// Long windows are row-sampled to keep result sets bounded.
    pub fn sampled(&self) -> bool {
        matches!(self, TimeRange::Last7Days | TimeRange::Last30Days)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimeRange::LastHour => "Last 1 Hour",
            TimeRange::Last6Hours => "Last 6 Hours",
            TimeRange::Last24Hours => "Last 24 Hours",
            TimeRange::Last7Days => "Last 7 Days",
            TimeRange::Last30Days => "Last 30 Days",
        };
        write!(f, "{label}")
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1h" => Ok(TimeRange::LastHour),
            "6h" => Ok(TimeRange::Last6Hours),
            "24h" => Ok(TimeRange::Last24Hours),
            "7d" => Ok(TimeRange::Last7Days),
            "30d" => Ok(TimeRange::Last30Days),
            other => Err(format!(
                "unknown time range '{other}' (expected 1h, 6h, 24h, 7d or 30d)"
            )),
        }
    }
}

/// Create the database connection pool.
///
/// The pool connects lazily so the service can come up and report per-request
/// errors while the database is unreachable.
pub fn create_pool(url: &str) -> Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new().max_connections(10).connect_lazy(url)
}

/// Query for the newest rows, newest first.
pub fn latest_query(table: &str, limit: u32) -> String {
    format!("SELECT {COLUMNS} FROM {table} ORDER BY times DESC LIMIT {limit}")
}

/// Query for a historical window, newest first, sampled on long windows.
pub fn historical_query(table: &str, range: TimeRange) -> String {
    let mut query = format!(
        "SELECT {COLUMNS} FROM {table} WHERE times >= NOW() - {}",
        range.interval_sql()
    );
    if range.sampled() {
        query.push_str(" AND MOD(UNIX_TIMESTAMP(times), 10) = 0");
    }
    query.push_str(" ORDER BY times DESC");
    query
}

/// Fetch the newest `limit` rows.
pub async fn latest_readings(
    pool: &MySqlPool,
    table: &str,
    limit: u32,
) -> Result<Vec<MachineReading>, sqlx::Error> {
    sqlx::query_as::<_, MachineReading>(&latest_query(table, limit))
        .fetch_all(pool)
        .await
}

/// Fetch a historical window of rows.
pub async fn historical_readings(
    pool: &MySqlPool,
    table: &str,
    range: TimeRange,
) -> Result<Vec<MachineReading>, sqlx::Error> {
    sqlx::query_as::<_, MachineReading>(&historical_query(table, range))
        .fetch_all(pool)
        .await
}

/// TTL-cached loader shared by the API handlers and the poller.
///
/// Latest rows are cached briefly (live data), historical windows longer.
pub struct DataLoader {
    pool: MySqlPool,
    table: String,
    latest_limit: u32,
    latest: Mutex<TtlCache<(), Vec<MachineReading>>>,
    historical: Mutex<TtlCache<TimeRange, Vec<MachineReading>>>,
}

impl DataLoader {
    pub fn new(pool: MySqlPool, table: String, config: &Config) -> Self {
        Self {
            pool,
            table,
            latest_limit: config.latest_rows,
            latest: Mutex::new(TtlCache::new(
                Duration::from_secs(config.latest_cache_ttl_secs),
                1,
            )),
            historical: Mutex::new(TtlCache::new(
                Duration::from_secs(config.historical_cache_ttl_secs),
                8,
            )),
        }
    }

    /// Newest rows for live metrics, cached.
    pub async fn latest(&self) -> Result<Vec<MachineReading>, sqlx::Error> {
        if let Some(rows) = self.latest.lock().expect("latest cache lock").get(&()) {
            return Ok(rows.clone());
        }

        let rows = latest_readings(&self.pool, &self.table, self.latest_limit).await?;
        self.latest
            .lock()
            .expect("latest cache lock")
            .insert((), rows.clone());
        Ok(rows)
    }

    /// Historical window for trends, cached per range.
    pub async fn historical(&self, range: TimeRange) -> Result<Vec<MachineReading>, sqlx::Error> {
        if let Some(rows) = self
            .historical
            .lock()
            .expect("historical cache lock")
            .get(&range)
        {
            return Ok(rows.clone());
        }

        let rows = historical_readings(&self.pool, &self.table, range).await?;
        self.historical
            .lock()
            .expect("historical cache lock")
            .insert(range, rows.clone());
        Ok(rows)
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_round_trip() {
        for (s, range) in [
            ("1h", TimeRange::LastHour),
            ("6h", TimeRange::Last6Hours),
            ("24h", TimeRange::Last24Hours),
            ("7d", TimeRange::Last7Days),
            ("30d", TimeRange::Last30Days),
        ] {
            assert_eq!(s.parse::<TimeRange>().unwrap(), range);
        }
        assert!("yesterday".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_time_range_labels() {
        assert_eq!(TimeRange::Last24Hours.to_string(), "Last 24 Hours");
        assert_eq!(TimeRange::default(), TimeRange::Last24Hours);
    }

    #[test]
    fn test_latest_query_shape() {
        let q = latest_query("datalog_ilapak3", 10);
        assert!(q.starts_with("SELECT"));
        assert!(q.contains("FROM datalog_ilapak3"));
        assert!(q.ends_with("ORDER BY times DESC LIMIT 10"));
    }

    #[test]
    fn test_historical_query_sampling() {
        let short = historical_query("datalog_ilapak3", TimeRange::Last6Hours);
        assert!(short.contains("INTERVAL 6 HOUR"));
        assert!(!short.contains("MOD(UNIX_TIMESTAMP"));

        let long = historical_query("datalog_ilapak3", TimeRange::Last30Days);
        assert!(long.contains("INTERVAL 30 DAY"));
        assert!(long.contains("MOD(UNIX_TIMESTAMP(times), 10) = 0"));
        assert!(long.ends_with("ORDER BY times DESC"));
    }

    #[test]
    fn test_columns_cover_sealing_temps() {
        assert!(COLUMNS.contains("seal_temp_vertical_upper"));
        assert!(COLUMNS.contains("seal_temp_horizontal_rear"));
        // Upstream schema quirk: trailing space inside the parens.
        assert!(COLUMNS.contains("(oC )"));
    }
}
