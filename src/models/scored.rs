//! Versioned, registry-resolved model with a single predict contract

use crate::encoder::{FeatureEncoder, FeatureMatrix};
use crate::error::ScoringError;
use crate::models::classifier::Classifier;
use crate::models::registry::{ModelReference, ModelRegistry};
use crate::schema::label_for;
use crate::types::prediction::{PredictionResult, ScoredRow};
use crate::types::record::RawRecord;
use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lazily resolved reference to one registered classifier.
///
/// Once loaded the artifact is never replaced; resolving again is a no-op.
pub struct ModelHandle {
    reference: ModelReference,
    artifact: Option<Arc<dyn Classifier>>,
}

impl ModelHandle {
    /// Unloaded handle for `name@alias`
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            reference: ModelReference::new(name, alias),
            artifact: None,
        }
    }

    pub fn reference(&self) -> &ModelReference {
        &self.reference
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact.is_some()
    }

    /// Fetch the artifact from `registry`. On failure the handle stays unloaded.
    pub fn resolve(&mut self, registry: &dyn ModelRegistry) -> Result<(), ScoringError> {
        if self.artifact.is_some() {
            return Ok(());
        }

        let uri = self.reference.uri();
        match registry.fetch(&self.reference) {
            Ok(classifier) => {
                info!(
                    reference = %uri,
                    kind = classifier.kind(),
                    "Model loaded successfully"
                );
                self.artifact = Some(classifier);
                Ok(())
            }
            Err(e) => {
                error!(reference = %uri, error = %e, "Failed to load model");
                Err(ScoringError::UnresolvedModel {
                    reference: uri,
                    source: e,
                })
            }
        }
    }

    fn classifier(&self) -> Result<&Arc<dyn Classifier>, ScoringError> {
        self.artifact.as_ref().ok_or_else(|| ScoringError::NotLoaded {
            reference: self.reference.uri(),
        })
    }
}

/// Classifier plus the encoder every prediction path goes through.
pub struct ScoredModel {
    handle: ModelHandle,
    encoder: FeatureEncoder,
}

impl ScoredModel {
    /// Resolve `name@alias` from `registry`, failing fast when it cannot be loaded.
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        registry: &dyn ModelRegistry,
    ) -> Result<Self, ScoringError> {
        let mut handle = ModelHandle::new(name, alias);
        handle.resolve(registry)?;
        Ok(Self::from_handle(handle))
    }

    /// Wrap an existing handle, loaded or not
    pub fn from_handle(handle: ModelHandle) -> Self {
        Self {
            handle,
            encoder: FeatureEncoder::new(),
        }
    }

    pub fn reference(&self) -> &ModelReference {
        self.handle.reference()
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_loaded()
    }

    /// Score raw rows.
    ///
    /// Returns one [`ScoredRow`] per input row in input order. Caller rows are
    /// only read. Encoding failures surface as [`ScoringError::Encoding`];
    /// anything going wrong inside the classifier becomes
    /// [`ScoringError::PredictionFailed`].
    pub fn predict(&self, rows: &[RawRecord]) -> Result<PredictionResult, ScoringError> {
        let classifier = self.handle.classifier()?;

        let batch = self.encoder.encode(rows).map_err(|e| {
            debug!(reference = %self.reference(), error = %e, "Encoding failed");
            e
        })?;

        let absent_fields = batch.absent_fields();
        for absent in &absent_fields {
            warn!(
                reference = %self.reference(),
                field = absent.field,
                rows = absent.rows,
                "Field absent, scored as missing"
            );
        }

        let width = self.encoder.feature_count();
        let probabilities = self
            .score(&**classifier, &batch.to_matrix(width), rows.len())
            .map_err(|e| {
                error!(reference = %self.reference(), error = %format!("{:#}", e), "Prediction failed");
                ScoringError::PredictionFailed {
                    reference: self.reference().uri(),
                    source: e,
                }
            })?;

        let scored: Vec<ScoredRow> = rows
            .iter()
            .zip(batch.rows)
            .zip(probabilities)
            .map(|((source, encoded), probability)| ScoredRow {
                source: source.clone(),
                encoded,
                probability,
                label: label_for(probability),
            })
            .collect();

        debug!(
            reference = %self.reference(),
            rows = scored.len(),
            unknown_fields = batch.unknown_categories.len(),
            "Prediction complete"
        );

        Ok(PredictionResult {
            rows: scored,
            unknown_categories: batch.unknown_categories,
            absent_fields,
        })
    }

    fn score(
        &self,
        classifier: &dyn Classifier,
        matrix: &FeatureMatrix,
        expected_rows: usize,
    ) -> anyhow::Result<Vec<f64>> {
        if classifier.n_features() != matrix.n_cols {
            return Err(anyhow!(
                "feature shape mismatch: encoded {} columns, model expects {}",
                matrix.n_cols,
                classifier.n_features()
            ));
        }

        let probabilities = classifier.predict_proba(matrix)?;

        if probabilities.len() != expected_rows {
            return Err(anyhow!(
                "model returned {} probabilities for {} rows",
                probabilities.len(),
                expected_rows
            ));
        }
        if let Some(p) = probabilities
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(anyhow!("model returned probability {} outside [0, 1]", p));
        }

        Ok(probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{CategoryCode, EncodedValue};
    use crate::error::RegistryError;
    use crate::models::classifier::StubClassifier;
    use crate::models::registry::StaticRegistry;
    use crate::schema::DECISION_THRESHOLD;

    /// Returns a caller-chosen probability per row, in order
    struct ScriptedClassifier {
        probabilities: Vec<f64>,
        n_features: usize,
    }

    impl Classifier for ScriptedClassifier {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn n_features(&self) -> usize {
            self.n_features
        }

        fn predict_proba(&self, matrix: &FeatureMatrix) -> anyhow::Result<Vec<f64>> {
            Ok(self.probabilities.iter().copied().take(matrix.n_rows).collect())
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn kind(&self) -> &'static str {
            "failing"
        }

        fn n_features(&self) -> usize {
            10
        }

        fn predict_proba(&self, _matrix: &FeatureMatrix) -> anyhow::Result<Vec<f64>> {
            Err(anyhow!("booster internal error"))
        }
    }

    fn sample_patient() -> RawRecord {
        RawRecord::new()
            .with("race", "chinese")
            .with("age", 30)
            .with("gender", "male")
            .with("breast_feeding_month", 12)
            .with("mother_occupation", "professional")
            .with("household_income", ">=4000")
            .with("mother_edu", "university")
            .with("delivery_type", "normal")
            .with("smoke_mother", "No")
            .with("night_bottle_feeding", "No")
    }

    fn model_with(classifier: Arc<dyn Classifier>) -> ScoredModel {
        let registry = StaticRegistry::new().with_model("mlops_project", "champion", classifier);
        ScoredModel::new("mlops_project", "champion", &registry).unwrap()
    }

    #[test]
    fn test_predict_with_stub() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 10)));
        let result = model.predict(&[sample_patient()]).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0].probability, 0.3);
        assert_eq!(result.rows[0].label, 0);
        assert_eq!(result.rows[0].source, sample_patient());
    }

    #[test]
    fn test_labels_follow_threshold() {
        let probabilities = vec![0.0, 0.3, DECISION_THRESHOLD, 0.50001, 0.9, 1.0];
        let model = model_with(Arc::new(ScriptedClassifier {
            probabilities: probabilities.clone(),
            n_features: 10,
        }));
        let rows = vec![sample_patient(); probabilities.len()];
        let result = model.predict(&rows).unwrap();

        assert_eq!(result.probabilities(), probabilities);
        assert_eq!(result.labels(), vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_row_order_and_count_preserved() {
        let model = model_with(Arc::new(ScriptedClassifier {
            probabilities: vec![0.1, 0.8, 0.4],
            n_features: 10,
        }));
        let rows = vec![
            sample_patient().with("age", 1),
            sample_patient().with("race", "martian").with("age", 2),
            sample_patient().with("age", 3),
        ];
        let result = model.predict(&rows).unwrap();

        assert_eq!(result.len(), 3);
        for (i, row) in result.rows.iter().enumerate() {
            assert_eq!(row.source, rows[i]);
            assert_eq!(
                row.encoded.get("age"),
                Some(&EncodedValue::Numeric((i + 1) as f64))
            );
        }
        assert_eq!(
            result.rows[1].encoded.get("race"),
            Some(&EncodedValue::Category(CategoryCode::Unknown(
                "martian".to_string()
            )))
        );
        assert_eq!(result.unknown_categories.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 10)));
        let result = model.predict(&[]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_unresolved_model_fails_fast() {
        let registry = StaticRegistry::new();
        let err = ScoredModel::new("mlops_project", "champion", &registry)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ScoringError::UnresolvedModel {
                source: RegistryError::ModelNotFound(_),
                ..
            }
        ));
    }

    #[test]
    fn test_predict_on_unloaded_handle() {
        let mut handle = ModelHandle::new("mlops_project", "champion");
        assert!(handle.resolve(&StaticRegistry::new()).is_err());
        assert!(!handle.is_loaded());

        let model = ScoredModel::from_handle(handle);
        for _ in 0..2 {
            let err = model.predict(&[sample_patient()]).unwrap_err();
            assert!(matches!(err, ScoringError::NotLoaded { .. }));
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let registry = StaticRegistry::new().with_model(
            "mlops_project",
            "champion",
            Arc::new(StubClassifier::new(0.3, 10)),
        );
        let mut handle = ModelHandle::new("mlops_project", "champion");
        handle.resolve(&registry).unwrap();
        // a registry that no longer knows the model must not unload it
        handle.resolve(&StaticRegistry::new()).unwrap();
        assert!(handle.is_loaded());
    }

    #[test]
    fn test_encoding_failure_is_client_error() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 10)));
        let err = model
            .predict(&[sample_patient().with("age", "invalid_age")])
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn test_absent_fields_reported() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 10)));
        let partial = RawRecord::new().with("race", "chinese").with("age", 30);
        let result = model.predict(&[partial, sample_patient()]).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.absent_fields.len(), 8);
        assert!(result.absent_fields.iter().all(|a| a.rows == 1));
        assert!(model.predict(&[sample_patient()]).unwrap().absent_fields.is_empty());
    }

    #[test]
    fn test_row_without_features_is_client_error() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 10)));
        let err = model
            .predict(&[RawRecord::new().with("patient_id", 7)])
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_shape_mismatch_is_prediction_failure() {
        let model = model_with(Arc::new(StubClassifier::new(0.3, 9)));
        let err = model.predict(&[sample_patient()]).unwrap_err();
        assert!(matches!(err, ScoringError::PredictionFailed { .. }));
    }

    #[test]
    fn test_classifier_errors_are_wrapped() {
        let model = model_with(Arc::new(FailingClassifier));
        let err = model.predict(&[sample_patient()]).unwrap_err();
        assert!(matches!(err, ScoringError::PredictionFailed { .. }));
        assert_eq!(err.to_string(), "Not able to predict outcome");
    }

    #[test]
    fn test_bad_probabilities_are_rejected() {
        let short = model_with(Arc::new(ScriptedClassifier {
            probabilities: vec![0.2],
            n_features: 10,
        }));
        let err = short
            .predict(&[sample_patient(), sample_patient()])
            .unwrap_err();
        assert!(matches!(err, ScoringError::PredictionFailed { .. }));

        let out_of_range = model_with(Arc::new(ScriptedClassifier {
            probabilities: vec![1.5],
            n_features: 10,
        }));
        assert!(out_of_range.predict(&[sample_patient()]).is_err());

        let nan = model_with(Arc::new(ScriptedClassifier {
            probabilities: vec![f64::NAN],
            n_features: 10,
        }));
        assert!(nan.predict(&[sample_patient()]).is_err());
    }

    #[test]
    fn test_caller_rows_untouched() {
        let model = model_with(Arc::new(StubClassifier::new(0.7, 10)));
        let rows = vec![sample_patient().with("race", "martian")];
        let before = rows.clone();
        let _ = model.predict(&rows).unwrap();
        assert_eq!(rows, before);
    }
}
