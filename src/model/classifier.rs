//! Pre-trained seal-leakage classifier.
//!
//! The model ships as a JSON artifact exported from the training pipeline:
//! a standard scaler plus one coefficient row and intercept per class,
//! evaluated with softmax. When no artifact is configured the service falls
//! back to threshold rules so the leakage view still renders a best-effort
//! overlay.

use crate::config::Thresholds;
use crate::core::features::{FeatureRow, FEATURE_NAMES};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Classifier output classes, in artifact index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeakageClass {
    Normal,
    Warning,
    Leak,
}

impl LeakageClass {
    pub fn label(&self) -> &'static str {
        match self {
            LeakageClass::Normal => "Normal",
            LeakageClass::Warning => "Warning",
            LeakageClass::Leak => "Leak",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Normal" => Some(LeakageClass::Normal),
            "Warning" => Some(LeakageClass::Warning),
            "Leak" => Some(LeakageClass::Leak),
            _ => None,
        }
    }
}

/// Standard-scaler parameters from training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    fn transform(&self, values: &mut [f64]) {
        for (i, v) in values.iter_mut().enumerate() {
            let mean = self.mean.get(i).copied().unwrap_or(0.0);
            let scale = self.scale.get(i).copied().unwrap_or(1.0).max(1e-12);
            *v = (*v - mean) / scale;
        }
    }
}

/// Serialized classifier: feature ordering, scaler, per-class linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub scaler: Scaler,
    pub classes: Vec<String>,
    /// One coefficient row per class, `feature_names` order
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
}

/// A validated, loaded classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    artifact: ModelArtifact,
    classes: Vec<LeakageClass>,
}

impl Classifier {
    /// Load and validate an artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        let artifact: ModelArtifact = serde_json::from_str(&content)?;
        Self::from_artifact(artifact)
    }

    /// Validate artifact dimensions and class labels.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let n_features = artifact.feature_names.len();
        let n_classes = artifact.classes.len();

        if n_features == 0 || n_classes < 2 {
            return Err(ModelError::Shape(format!(
                "artifact needs at least 1 feature and 2 classes, got {n_features}/{n_classes}"
            )));
        }
        if artifact.scaler.mean.len() != n_features || artifact.scaler.scale.len() != n_features {
            return Err(ModelError::Shape(format!(
                "scaler length {}/{} does not match {n_features} features",
                artifact.scaler.mean.len(),
                artifact.scaler.scale.len()
            )));
        }
        if artifact.coefficients.len() != n_classes || artifact.intercepts.len() != n_classes {
            return Err(ModelError::Shape(format!(
                "expected {n_classes} coefficient rows and intercepts, got {}/{}",
                artifact.coefficients.len(),
                artifact.intercepts.len()
            )));
        }
        for (i, row) in artifact.coefficients.iter().enumerate() {
            if row.len() != n_features {
                return Err(ModelError::Shape(format!(
                    "coefficient row {i} has {} entries, expected {n_features}",
                    row.len()
                )));
            }
        }
        for name in &artifact.feature_names {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                return Err(ModelError::UnknownFeature(name.clone()));
            }
        }

        let classes = artifact
            .classes
            .iter()
            .map(|label| {
                LeakageClass::from_label(label).ok_or_else(|| ModelError::UnknownClass(label.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { artifact, classes })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Classify one feature row.
    pub fn predict(&self, row: &FeatureRow) -> Result<Prediction, ModelError> {
        let mut x: Vec<f64> = Vec::with_capacity(self.artifact.feature_names.len());
        for name in &self.artifact.feature_names {
            let value = row
                .feature(name)
                .ok_or_else(|| ModelError::UnknownFeature(name.clone()))?;
            x.push(value);
        }
        self.artifact.scaler.transform(&mut x);

        let mut scores: Vec<f64> = self
            .artifact
            .coefficients
            .iter()
            .zip(&self.artifact.intercepts)
            .map(|(coeffs, intercept)| {
                intercept + coeffs.iter().zip(&x).map(|(c, v)| c * v).sum::<f64>()
            })
            .collect();
        softmax(&mut scores);

        let (best, probability) = scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("at least two classes");

        Ok(Prediction {
            class: self.classes[best],
            probability,
            probabilities: scores,
        })
    }
}

/// Numerically stable in-place softmax.
fn softmax(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    if sum > 0.0 {
        for s in scores.iter_mut() {
            *s /= sum;
        }
    }
}

/// A single classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub class: LeakageClass,
    /// Probability of the predicted class
    pub probability: f64,
    /// Probabilities in artifact class order
    pub probabilities: Vec<f64>,
}

/// One prediction anchored to its sample timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct RowPrediction {
    pub at: NaiveDateTime,
    pub class: LeakageClass,
    pub probability: f64,
}

/// Threshold rules used when no artifact is available.
///
/// Counts threshold breaches over the sealing bars and the reject counter,
/// in the same spirit as the model but far coarser.
#[derive(Debug, Clone)]
pub struct HeuristicRules {
    thresholds: Thresholds,
}

/// Sealing pair imbalance considered abnormal, degrees C.
const SEAL_DIFF_LIMIT: f64 = 15.0;

impl HeuristicRules {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn predict(&self, row: &FeatureRow) -> Prediction {
        let temps = [
            row.seal_temp_vertical_upper,
            row.seal_temp_vertical_lower,
            row.seal_temp_horizontal_front,
            row.seal_temp_horizontal_rear,
        ];

        let mut breaches = 0u32;
        breaches += temps
            .iter()
            .filter(|&&t| t > self.thresholds.temp_warning)
            .count() as u32;
        if row.diff_seal_vertical.abs() > SEAL_DIFF_LIMIT {
            breaches += 1;
        }
        if row.diff_seal_horizontal.abs() > SEAL_DIFF_LIMIT {
            breaches += 1;
        }
        if row.reject_delta > 0.0 {
            breaches += 1;
        }

        let over_danger = temps.iter().any(|&t| t > self.thresholds.temp_danger);

        let (class, probabilities) = if over_danger || breaches >= 3 {
            (LeakageClass::Leak, vec![0.05, 0.15, 0.80])
        } else if breaches >= 1 {
            (LeakageClass::Warning, vec![0.25, 0.65, 0.10])
        } else {
            (LeakageClass::Normal, vec![0.90, 0.08, 0.02])
        };

        let probability = probabilities
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        Prediction {
            class,
            probability,
            probabilities,
        }
    }
}

/// The active predictor: artifact-backed or heuristic.
#[derive(Debug, Clone)]
pub enum Predictor {
    Model(Classifier),
    Heuristic(HeuristicRules),
}

impl Predictor {
    /// Load the configured artifact, falling back to heuristic rules.
    pub fn from_config(model_path: Option<&Path>, thresholds: &Thresholds) -> Self {
        match model_path {
            Some(path) => match Classifier::load(path) {
                Ok(classifier) => {
                    tracing::info!("loaded classifier artifact from {}", path.display());
                    Predictor::Model(classifier)
                }
                Err(e) => {
                    tracing::warn!(
                        "could not load classifier from {} ({e}), using heuristic rules",
                        path.display()
                    );
                    Predictor::Heuristic(HeuristicRules::new(thresholds.clone()))
                }
            },
            None => {
                tracing::info!("no classifier artifact configured, using heuristic rules");
                Predictor::Heuristic(HeuristicRules::new(thresholds.clone()))
            }
        }
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<Prediction, ModelError> {
        match self {
            Predictor::Model(classifier) => classifier.predict(row),
            Predictor::Heuristic(rules) => Ok(rules.predict(row)),
        }
    }

    /// Which backend is active, for status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Predictor::Model(_) => "artifact",
            Predictor::Heuristic(_) => "heuristic",
        }
    }
}

/// Classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("artifact shape error: {0}")]
    Shape(String),
    #[error("unknown feature '{0}' in artifact")]
    UnknownFeature(String),
    #[error("unknown class label '{0}' in artifact")]
    UnknownClass(String),
}
