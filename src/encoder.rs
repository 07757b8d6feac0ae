//! Feature encoding for caries model inference.
//!
//! Turns raw caller rows into the exact representation the classifier was
//! fit on: categorical values become their code in the schema's fixed
//! level list, numeric values become `f64`, and columns come out in schema
//! order. Unseen categorical levels do not fail the row; they are kept as
//! [`CategoryCode::Unknown`] and reported once per field and batch.

use crate::error::EncodingError;
use crate::schema::{FeatureKind, FeatureSchema, FeatureSpec, CARIES_SCHEMA};
use crate::types::record::RawRecord;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Value fed to the model for unknown categories and absent fields.
///
/// The classifier was trained with NaN as its missing-value marker, so an
/// unseen level is scored exactly like a missing one.
pub const MISSING_SENTINEL: f32 = f32::NAN;

/// Result of looking a raw string up in a categorical level list
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryCode {
    Known(u32),
    Unknown(String),
}

/// One encoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Category(CategoryCode),
    Numeric(f64),
}

impl EncodedValue {
    /// Matrix representation of this cell.
    pub fn as_feature(&self) -> f32 {
        match self {
            EncodedValue::Category(CategoryCode::Known(code)) => *code as f32,
            EncodedValue::Category(CategoryCode::Unknown(_)) => MISSING_SENTINEL,
            EncodedValue::Numeric(v) => *v as f32,
        }
    }
}

/// Schema-ordered encoding of one input row. `None` marks an absent field.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRow {
    schema: &'static FeatureSchema,
    values: Vec<Option<EncodedValue>>,
}

impl EncodedRow {
    /// Encoded value of a feature, `None` when the field was absent.
    pub fn get(&self, name: &str) -> Option<&EncodedValue> {
        self.schema
            .index_of(name)
            .and_then(|idx| self.values[idx].as_ref())
    }

    /// Cells in schema column order
    pub fn values(&self) -> &[Option<EncodedValue>] {
        &self.values
    }

    /// Names of schema fields the input did not provide
    pub fn absent_fields(&self) -> Vec<&'static str> {
        self.schema
            .features
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| v.is_none())
            .map(|(f, _)| f.name)
            .collect()
    }

    /// Dense feature vector in column order.
    pub fn to_features(&self) -> Vec<f32> {
        self.values
            .iter()
            .map(|v| v.as_ref().map_or(MISSING_SENTINEL, EncodedValue::as_feature))
            .collect()
    }
}

/// A field whose values fell outside its declared level set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory {
    pub field: &'static str,
    /// Distinct unrecognized values, in order of first appearance
    pub values: Vec<String>,
}

/// A schema field missing from some rows of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsentField {
    pub field: &'static str,
    /// Number of rows without the field
    pub rows: usize,
}

/// Output of [`FeatureEncoder::encode`]
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub rows: Vec<EncodedRow>,
    /// One entry per offending field, in schema column order
    pub unknown_categories: Vec<UnknownCategory>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Schema fields absent from at least one row, in column order.
    pub fn absent_fields(&self) -> Vec<AbsentField> {
        let Some(first) = self.rows.first() else {
            return Vec::new();
        };
        let schema = first.schema;
        let mut counts = vec![0usize; schema.width()];
        for row in &self.rows {
            for name in row.absent_fields() {
                if let Some(idx) = schema.index_of(name) {
                    counts[idx] += 1;
                }
            }
        }
        schema
            .features
            .iter()
            .zip(counts)
            .filter(|(_, rows)| *rows > 0)
            .map(|(f, rows)| AbsentField {
                field: f.name,
                rows,
            })
            .collect()
    }

    /// Row-major feature matrix for the classifier.
    pub fn to_matrix(&self, n_cols: usize) -> FeatureMatrix {
        let mut data = Vec::with_capacity(self.rows.len() * n_cols);
        for row in &self.rows {
            data.extend(row.to_features());
        }
        FeatureMatrix {
            n_rows: self.rows.len(),
            n_cols,
            data,
        }
    }
}

/// Dense `n_rows x n_cols` matrix, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    pub data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn row(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.n_cols..(idx + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero width
        self.data.chunks_exact(self.n_cols.max(1)).take(self.n_rows)
    }
}

/// Encoder bound to one fixed feature schema.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEncoder {
    schema: &'static FeatureSchema,
}

impl FeatureEncoder {
    /// Encoder for the caries schema.
    pub fn new() -> Self {
        Self::with_schema(&CARIES_SCHEMA)
    }

    pub fn with_schema(schema: &'static FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'static FeatureSchema {
        self.schema
    }

    /// Number of columns produced per row.
    pub fn feature_count(&self) -> usize {
        self.schema.width()
    }

    /// Column names, matching the training frame order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        self.schema.feature_names()
    }

    /// Encode a batch of raw rows.
    ///
    /// Fails when a value cannot be interpreted for its declared kind or a
    /// row carries no schema field at all; unknown categorical levels are
    /// logged and kept as [`CategoryCode::Unknown`].
    pub fn encode(&self, rows: &[RawRecord]) -> Result<EncodedBatch, EncodingError> {
        let mut unknown: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut ignored: BTreeSet<&str> = BTreeSet::new();
        let mut encoded = Vec::with_capacity(rows.len());

        for (row_idx, row) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(self.schema.width());
            for (idx, spec) in self.schema.features.iter().enumerate() {
                let value = encode_value(spec, row.get(spec.name))?;
                if let Some(EncodedValue::Category(CategoryCode::Unknown(raw))) = &value {
                    let seen = unknown.entry(idx).or_default();
                    if !seen.contains(raw) {
                        seen.push(raw.clone());
                    }
                }
                values.push(value);
            }
            if values.iter().all(Option::is_none) {
                return Err(EncodingError::NoSchemaFields { row: row_idx });
            }
            ignored.extend(
                row.keys()
                    .map(String::as_str)
                    .filter(|k| self.schema.get(k).is_none()),
            );
            encoded.push(EncodedRow {
                schema: self.schema,
                values,
            });
        }

        if !ignored.is_empty() {
            debug!(fields = ?ignored, "Ignoring fields outside the feature schema");
        }

        let unknown_categories: Vec<UnknownCategory> = unknown
            .into_iter()
            .map(|(idx, values)| UnknownCategory {
                field: self.schema.features[idx].name,
                values,
            })
            .collect();

        for u in &unknown_categories {
            warn!(field = %u.field, values = ?u.values, "Unknown categories in column");
        }

        Ok(EncodedBatch {
            rows: encoded,
            unknown_categories,
        })
    }
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_value(
    spec: &FeatureSpec,
    raw: Option<&Value>,
) -> Result<Option<EncodedValue>, EncodingError> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    match spec.kind {
        FeatureKind::Numeric => to_numeric(spec.name, raw).map(|v| Some(EncodedValue::Numeric(v))),
        FeatureKind::Categorical(_) => match raw {
            Value::String(s) => {
                let code = match spec.code_of(s) {
                    Some(code) => CategoryCode::Known(code),
                    None => CategoryCode::Unknown(s.clone()),
                };
                Ok(Some(EncodedValue::Category(code)))
            }
            other => Err(EncodingError::NotText {
                field: spec.name,
                value: other.to_string(),
            }),
        },
    }
}

fn to_numeric(field: &'static str, raw: &Value) -> Result<f64, EncodingError> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v.abs() <= f32::MAX as f64 => Ok(v),
        _ => Err(EncodingError::NotNumeric {
            field,
            value: raw.to_string(),
        }),
    }
}
