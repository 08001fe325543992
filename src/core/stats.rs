//! Series summaries and small numeric helpers for the dashboard views.

use serde::Serialize;
use statrs::statistics::Statistics;

/// Point budget for trend series returned to chart clients.
pub const DEFAULT_MAX_POINTS: usize = 100;

/// Mean/min/max summary of a metric series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Summarize a series; `None` for an empty one.
pub fn summarize(values: &[f64]) -> Option<SeriesSummary> {
    if values.is_empty() {
        return None;
    }

    Some(SeriesSummary {
        mean: Statistics::mean(values.iter()),
        min: Statistics::min(values.iter()),
        max: Statistics::max(values.iter()),
    })
}

/// Latest-vs-previous delta over a newest-first series.
pub fn latest_delta(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(values[0] - values[1])
}

/// Percent change from `previous` to `current`; `None` when undefined.
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// OEE from its components, all in the percent domain.
pub fn oee(availability: f64, performance: f64, quality: f64) -> f64 {
    availability * performance * quality / 10_000.0
}

/// Stride-sample a series down to roughly `max_points` entries.
pub fn downsample<T: Clone>(rows: &[T], max_points: usize) -> Vec<T> {
    if max_points == 0 || rows.len() <= max_points {
        return rows.to_vec();
    }
    let step = (rows.len() / max_points).max(1);
    rows.iter().step_by(step).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        let summary = summarize(&[2.0, 4.0, 6.0]).unwrap();
        assert!((summary.mean - 4.0).abs() < 1e-9);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 6.0);

        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_latest_delta() {
        assert_eq!(latest_delta(&[73.4, 71.0]), Some(2.4000000000000057));
        assert_eq!(latest_delta(&[73.4]), None);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(110.0, 100.0), Some(10.0));
        assert_eq!(percent_change(110.0, 0.0), None);
    }

    #[test]
    fn test_oee_identity() {
        let value = oee(90.0, 80.0, 95.0);
        assert!((value - 68.4).abs() < 1e-9);
    }

    #[test]
    fn test_downsample() {
        let rows: Vec<u32> = (0..1000).collect();
        let sampled = downsample(&rows, 100);
        assert!(sampled.len() <= 101);
        assert_eq!(sampled[0], 0);
        assert_eq!(sampled[1], 10);

        let short: Vec<u32> = (0..50).collect();
        assert_eq!(downsample(&short, 100).len(), 50);
    }
}
