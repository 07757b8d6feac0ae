//! Scored rows and HTTP response bodies

use crate::encoder::{AbsentField, EncodedRow, UnknownCategory};
use crate::types::record::RawRecord;
use serde::{Deserialize, Serialize};

/// One input row with its prediction attached.
///
/// Serializes as the original fields plus the fixed `predict_proba` and
/// `prediction` columns read by the monitoring pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    #[serde(flatten)]
    pub source: RawRecord,

    #[serde(skip)]
    pub encoded: EncodedRow,

    /// Positive-class probability
    #[serde(rename = "predict_proba")]
    pub probability: f64,

    /// Label derived with the decision threshold
    #[serde(rename = "prediction")]
    pub label: u8,
}

/// Output of `ScoredModel::predict`: one scored row per input row, in order
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub rows: Vec<ScoredRow>,
    /// Unknown categorical levels seen while encoding (already logged)
    pub unknown_categories: Vec<UnknownCategory>,
    /// Schema fields some rows did not provide, scored as missing
    pub absent_fields: Vec<AbsentField>,
}

impl PredictionResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.probability).collect()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }
}

/// Body returned by `POST /predict` on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: u8,
    pub status: String,
}

impl PredictResponse {
    pub fn success(prediction: u8) -> Self {
        Self {
            prediction,
            status: "success".to_string(),
        }
    }
}

/// Body returned on any request failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
