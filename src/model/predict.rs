//! Inference entry points used by the leakage view and the CLI.

use crate::db::MachineReading;
use crate::core::features::preprocess;
use crate::model::cache::{batch_key, row_key, PredictionCache};
use crate::model::classifier::{LeakageClass, ModelError, Prediction, Predictor, RowPrediction};
use serde::Serialize;

/// Classify the newest reading, reusing a cached result when the row is
/// unchanged. `None` when there are no rows.
pub fn infer(
    predictor: &Predictor,
    cache: &PredictionCache,
    readings: &[MachineReading],
) -> Result<Option<Prediction>, ModelError> {
    let rows = preprocess(readings);
    let Some(newest) = rows.last() else {
        return Ok(None);
    };

    let key = row_key(newest);
    if let Some(prediction) = cache.get_row(&key) {
        return Ok(Some(prediction));
    }

    let prediction = predictor.predict(newest)?;
    cache.put_row(key, prediction.clone());
    Ok(Some(prediction))
}

/// Classify every reading in a window, oldest first.
///
/// An unchanged window is served entirely from the batch layer; otherwise
/// rows that were already classified are reused individually and only the
/// new rows hit the model.
pub fn batch_infer(
    predictor: &Predictor,
    cache: &PredictionCache,
    readings: &[MachineReading],
) -> Result<Vec<RowPrediction>, ModelError> {
    let rows = preprocess(readings);
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let window_key = batch_key(&rows);
    if let Some(batch) = cache.get_batch(&window_key) {
        return Ok(batch);
    }

    let mut batch = Vec::with_capacity(rows.len());
    for row in &rows {
        let key = row_key(row);
        let prediction = match cache.get_row(&key) {
            Some(prediction) => prediction,
            None => {
                let prediction = predictor.predict(row)?;
                cache.put_row(key, prediction.clone());
                prediction
            }
        };

        batch.push(RowPrediction {
            at: row.times,
            class: prediction.class,
            probability: prediction.probability,
        });
    }

    cache.put_batch(window_key, batch.clone());
    Ok(batch)
}

/// Per-class totals over a prediction window.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionCounts {
    pub total: usize,
    pub normal: usize,
    pub warning: usize,
    pub leak: usize,
    pub normal_pct: f64,
    pub warning_pct: f64,
    pub leak_pct: f64,
}

/// Count predictions per class with their share of the window.
pub fn summarize_predictions(batch: &[RowPrediction]) -> PredictionCounts {
    let total = batch.len();
    let count =
        |class: LeakageClass| batch.iter().filter(|p| p.class == class).count();

    let normal = count(LeakageClass::Normal);
    let warning = count(LeakageClass::Warning);
    let leak = count(LeakageClass::Leak);

    let pct = |n: usize| {
        if total == 0 {
            0.0
        } else {
            n as f64 / total as f64 * 100.0
        }
    };

    PredictionCounts {
        total,
        normal,
        warning,
        leak,
        normal_pct: pct(normal),
        warning_pct: pct(warning),
        leak_pct: pct(leak),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::tests::make_reading;
    use crate::model::classifier::tests::test_artifact;
    use crate::model::classifier::Classifier;
    use std::time::Duration;

    fn model_predictor() -> Predictor {
        Predictor::Model(Classifier::from_artifact(test_artifact()).unwrap())
    }

    fn cache() -> PredictionCache {
        PredictionCache::new(Duration::from_secs(60), 64)
    }

    #[test]
    fn test_infer_empty_window() {
        let result = infer(&model_predictor(), &cache(), &[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_infer_uses_row_cache() {
        let predictor = model_predictor();
        let cache = cache();
        let readings = vec![make_reading(5, 1100, 22), make_reading(0, 1000, 20)];

        let first = infer(&predictor, &cache, &readings).unwrap().unwrap();
        let second = infer(&predictor, &cache, &readings).unwrap().unwrap();
        assert_eq!(first.class, second.class);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_batch_infer_serves_unchanged_window_from_cache() {
        let predictor = model_predictor();
        let cache = cache();
        let readings = vec![
            make_reading(10, 1200, 24),
            make_reading(5, 1100, 22),
            make_reading(0, 1000, 20),
        ];

        let first = batch_infer(&predictor, &cache, &readings).unwrap();
        assert_eq!(first.len(), 3);
        assert!(first[0].at < first[2].at);

        let stats = cache.stats();
        let misses_after_first = stats.misses;

        let second = batch_infer(&predictor, &cache, &readings).unwrap();
        assert_eq!(second.len(), 3);

        let stats = cache.stats();
        assert_eq!(stats.misses, misses_after_first);
        assert!(stats.hits >= 1);
    }

    #[test]
    fn test_batch_infer_reuses_rows_when_window_grows() {
        let predictor = model_predictor();
        let cache = cache();
        let readings = vec![make_reading(5, 1100, 22), make_reading(0, 1000, 20)];

        batch_infer(&predictor, &cache, &readings).unwrap();
        let row_misses = cache.stats().misses;

        // One new sample arrives; the two old rows must come from the cache.
        let grown = vec![
            make_reading(10, 1200, 24),
            make_reading(5, 1100, 22),
            make_reading(0, 1000, 20),
        ];
        let batch = batch_infer(&predictor, &cache, &grown).unwrap();
        assert_eq!(batch.len(), 3);

        let stats = cache.stats();
        // Misses grow by two: the batch digest and the one genuinely new row.
        assert_eq!(stats.misses, row_misses + 2);
    }

    #[test]
    fn test_summarize_predictions() {
        let predictor = model_predictor();
        let cache = cache();
        let readings = vec![make_reading(5, 1100, 22), make_reading(0, 1000, 20)];
        let batch = batch_infer(&predictor, &cache, &readings).unwrap();

        let counts = summarize_predictions(&batch);
        assert_eq!(counts.total, 2);
        assert_eq!(counts.normal + counts.warning + counts.leak, 2);
        let share_sum = counts.normal_pct + counts.warning_pct + counts.leak_pct;
        assert!((share_sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_empty() {
        let counts = summarize_predictions(&[]);
        assert_eq!(counts.total, 0);
        assert_eq!(counts.normal_pct, 0.0);
    }
}
