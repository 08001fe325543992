//! Content-hashed prediction cache.
//!
//! Inference over an unchanged window is wasted work: the datalog only grows
//! by one row per machine tick while the dashboard refreshes much faster.
//! Predictions are therefore cached under SHA-256 digests of the input rows,
//! at two granularities behind one lock:
//!
//! - a batch layer keyed by a digest over every row in the window, serving
//!   whole trend responses, and
//! - a row layer keyed per row, so a window that only gained a few rows
//!   still reuses the per-row results it already paid for.
//!
//! Entries expire after a short TTL and the layers are capacity bounded.
//! Everything is best-effort and in-memory only.

use crate::cache::TtlCache;
use crate::core::features::{FeatureRow, FEATURE_NAMES};
use crate::model::classifier::{Prediction, RowPrediction};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Digest of one feature row's content.
pub fn row_key(row: &FeatureRow) -> String {
    let mut hasher = Sha256::new();
    hash_row(&mut hasher, row);
    hex::encode(hasher.finalize())
}

/// Digest over an entire window of feature rows.
pub fn batch_key(rows: &[FeatureRow]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((rows.len() as u64).to_le_bytes());
    for row in rows {
        hash_row(&mut hasher, row);
    }
    hex::encode(hasher.finalize())
}

fn hash_row(hasher: &mut Sha256, row: &FeatureRow) {
    hasher.update(row.times.and_utc().timestamp().to_le_bytes());
    for name in FEATURE_NAMES {
        let value = row.feature(name).unwrap_or(f64::NAN);
        hasher.update(value.to_bits().to_le_bytes());
    }
}

struct Layers {
    batches: TtlCache<String, Vec<RowPrediction>>,
    rows: TtlCache<String, Prediction>,
}

/// TTL cache for classifier results.
pub struct PredictionCache {
    layers: Mutex<Layers>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PredictionCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            layers: Mutex::new(Layers {
                batches: TtlCache::new(ttl, capacity),
                rows: TtlCache::new(ttl, capacity),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get_batch(&self, key: &str) -> Option<Vec<RowPrediction>> {
        let mut layers = self.layers.lock().expect("prediction cache lock");
        match layers.batches.get(&key.to_string()) {
            Some(batch) => {
                let batch = batch.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(batch)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_batch(&self, key: String, batch: Vec<RowPrediction>) {
        self.layers
            .lock()
            .expect("prediction cache lock")
            .batches
            .insert(key, batch);
    }

    pub fn get_row(&self, key: &str) -> Option<Prediction> {
        let mut layers = self.layers.lock().expect("prediction cache lock");
        match layers.rows.get(&key.to_string()) {
            Some(prediction) => {
                let prediction = prediction.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(prediction)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_row(&self, key: String, prediction: Prediction) {
        self.layers
            .lock()
            .expect("prediction cache lock")
            .rows
            .insert(key, prediction);
    }

    /// Counters for the leakage view and `/api/status`.
    pub fn stats(&self) -> CacheStats {
        let layers = self.layers.lock().expect("prediction cache lock");
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            batch_entries: layers.batches.len(),
            row_entries: layers.rows.len(),
            evictions: layers.batches.evictions() + layers.rows.evictions(),
        }
    }

    /// Drop all cached predictions.
    pub fn clear(&self) {
        let mut layers = self.layers.lock().expect("prediction cache lock");
        layers.batches.clear();
        layers.rows.clear();
    }
}

/// Prediction-cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub batch_entries: usize,
    pub row_entries: usize,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{preprocess, tests::make_reading};
    use crate::model::classifier::LeakageClass;

    fn prediction() -> Prediction {
        Prediction {
            class: LeakageClass::Normal,
            probability: 0.9,
            probabilities: vec![0.9, 0.08, 0.02],
        }
    }

    #[test]
    fn test_row_key_is_content_sensitive() {
        let rows = preprocess(&[make_reading(0, 1000, 20)]);
        let key_a = row_key(&rows[0]);
        assert_eq!(key_a, row_key(&rows[0]));

        let mut changed = make_reading(0, 1000, 20);
        changed.seal_temp_vertical_upper += 0.1;
        let rows_b = preprocess(&[changed]);
        assert_ne!(key_a, row_key(&rows_b[0]));
    }

    #[test]
    fn test_batch_key_depends_on_every_row() {
        let rows_a = preprocess(&[make_reading(0, 1000, 20), make_reading(5, 1100, 22)]);
        let rows_b = preprocess(&[make_reading(0, 1000, 20), make_reading(5, 1100, 23)]);
        assert_ne!(batch_key(&rows_a), batch_key(&rows_b));
        assert_ne!(batch_key(&rows_a), batch_key(&rows_a[..1]));
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = PredictionCache::new(Duration::from_secs(60), 16);
        assert!(cache.get_row("missing").is_none());

        cache.put_row("k".to_string(), prediction());
        assert!(cache.get_row("k").is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.row_entries, 1);
    }

    #[test]
    fn test_ttl_eviction() {
        let cache = PredictionCache::new(Duration::from_millis(10), 16);
        cache.put_row("k".to_string(), prediction());
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get_row("k").is_none());
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn test_clear() {
        let cache = PredictionCache::new(Duration::from_secs(60), 16);
        cache.put_row("k".to_string(), prediction());
        cache.put_batch("b".to_string(), Vec::new());
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.row_entries, 0);
        assert_eq!(stats.batch_entries, 0);
    }
}
