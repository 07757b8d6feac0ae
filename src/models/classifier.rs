//! Classifier seam between the scored model and concrete artifacts

use crate::encoder::FeatureMatrix;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// A trained binary classifier over the encoded feature matrix.
///
/// Implementations are shared read-only between concurrent callers.
pub trait Classifier: Send + Sync {
    /// Short artifact kind used in logs ("onnx", "logistic", "stub")
    fn kind(&self) -> &'static str;

    /// Number of columns the classifier was fit on
    fn n_features(&self) -> usize;

    /// Feature names recorded with the artifact, when it carries a signature
    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    /// Positive-class probability for every matrix row, in row order.
    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>>;
}

/// Constant-probability classifier used when serving without a registry.
#[derive(Debug, Clone)]
pub struct StubClassifier {
    probability: f64,
    n_features: usize,
}

impl StubClassifier {
    pub fn new(probability: f64, n_features: usize) -> Self {
        Self {
            probability,
            n_features,
        }
    }
}

impl Classifier for StubClassifier {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(vec![self.probability; matrix.n_rows])
    }
}

/// Contribution of one column to the logit
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Numeric column: value times slope
    Slope(f64),
    /// Categorical column: one weight per level code
    Levels(Vec<f64>),
}

/// Logistic model stored as `model.json`.
///
/// Missing cells (NaN) contribute nothing to the logit.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticClassifier {
    feature_names: Vec<String>,
    intercept: f64,
    terms: Vec<Term>,
}

impl LogisticClassifier {
    /// Load and validate a JSON artifact
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid artifact {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(raw)?;
        if model.terms.len() != model.feature_names.len() {
            bail!(
                "{} terms for {} features",
                model.terms.len(),
                model.feature_names.len()
            );
        }
        Ok(model)
    }

    fn logit(&self, row: &[f32]) -> Result<f64> {
        let mut z = self.intercept;
        for (idx, (term, &x)) in self.terms.iter().zip(row).enumerate() {
            if x.is_nan() {
                continue;
            }
            z += match term {
                Term::Slope(w) => w * x as f64,
                Term::Levels(weights) => {
                    let code = x as usize;
                    if x < 0.0 || x.fract() != 0.0 || code >= weights.len() {
                        bail!(
                            "code {} out of range for '{}' ({} levels)",
                            x,
                            self.feature_names[idx],
                            weights.len()
                        );
                    }
                    weights[code]
                }
            };
        }
        Ok(z)
    }
}

impl Classifier for LogisticClassifier {
    fn kind(&self) -> &'static str {
        "logistic"
    }

    fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.feature_names)
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        if matrix.n_cols != self.n_features() {
            bail!(
                "matrix has {} columns, model expects {}",
                matrix.n_cols,
                self.n_features()
            );
        }
        matrix
            .rows()
            .map(|row| self.logit(row).map(sigmoid))
            .collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> FeatureMatrix {
        FeatureMatrix {
            n_rows: rows.len(),
            n_cols: rows.first().map_or(0, |r| r.len()),
            data: rows.iter().flat_map(|r| r.iter().copied()).collect(),
        }
    }

    const ARTIFACT: &str = r#"{
        "feature_names": ["race", "age"],
        "intercept": -1.0,
        "terms": [{"levels": [0.0, 0.5, 1.0]}, {"slope": 0.05}]
    }"#;

    #[test]
    fn test_stub_returns_constant() {
        let stub = StubClassifier::new(0.3, 2);
        let probs = stub.predict_proba(&matrix(&[&[0.0, 1.0], &[1.0, 2.0]])).unwrap();
        assert_eq!(probs, vec![0.3, 0.3]);
    }

    #[test]
    fn test_logistic_scoring() {
        let model = LogisticClassifier::from_json(ARTIFACT).unwrap();
        assert_eq!(model.n_features(), 2);

        // z = -1 + 1.0 + 0.05 * 20 = 1.0
        let probs = model.predict_proba(&matrix(&[&[2.0, 20.0]])).unwrap();
        assert!((probs[0] - sigmoid(1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_missing_cells_contribute_nothing() {
        let model = LogisticClassifier::from_json(ARTIFACT).unwrap();
        let probs = model
            .predict_proba(&matrix(&[&[f32::NAN, f32::NAN]]))
            .unwrap();
        assert!((probs[0] - sigmoid(-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_rejects_shape_mismatch() {
        let model = LogisticClassifier::from_json(ARTIFACT).unwrap();
        assert!(model.predict_proba(&matrix(&[&[0.0, 1.0, 2.0]])).is_err());
        assert!(model.predict_proba(&matrix(&[&[3.0, 1.0]])).is_err());
    }

    #[test]
    fn test_logistic_rejects_inconsistent_artifact() {
        let raw = r#"{"feature_names": ["race"], "intercept": 0.0, "terms": []}"#;
        assert!(LogisticClassifier::from_json(raw).is_err());
    }
}
