//! Error taxonomy for encoding, model resolution and scoring

use thiserror::Error;

/// A raw value could not be interpreted for its declared feature kind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    #[error("invalid value for numeric field '{field}': {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("invalid value for categorical field '{field}': expected a string, got {value}")]
    NotText { field: &'static str, value: String },

    #[error("row {row} carries none of the model's features")]
    NoSchemaFields { row: usize },
}

impl EncodingError {
    /// Name of the offending field, if the failure concerns a single one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            EncodingError::NotNumeric { field, .. } | EncodingError::NotText { field, .. } => {
                Some(*field)
            }
            EncodingError::NoSchemaFields { .. } => None,
        }
    }
}

/// Failure to fetch an artifact from the model registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registered model '{0}' not found")]
    ModelNotFound(String),

    #[error("alias '{alias}' not found for model '{name}'")]
    AliasNotFound { name: String, alias: String },

    #[error("no artifact found for {0}")]
    ArtifactNotFound(String),

    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("artifact for {reference} is incompatible with schema {schema}")]
    SignatureMismatch {
        reference: String,
        schema: &'static str,
    },

    #[error("failed to load artifact for {reference}")]
    Artifact {
        reference: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors surfaced by a [`ScoredModel`](crate::models::ScoredModel).
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to resolve model {reference}")]
    UnresolvedModel {
        reference: String,
        #[source]
        source: RegistryError,
    },

    #[error("model {reference} not loaded")]
    NotLoaded { reference: String },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("Not able to predict outcome")]
    PredictionFailed {
        reference: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ScoringError {
    /// Whether the failure was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ScoringError::Encoding(_))
    }
}
