//! Caries Scoring Service Library
//!
//! Scores pediatric dental-caries risk from patient questionnaire rows
//! using a classifier resolved from a versioned model registry.

pub mod config;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod models;
pub mod schema;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use encoder::FeatureEncoder;
pub use error::{EncodingError, RegistryError, ScoringError};
pub use models::{ModelRegistry, ScoredModel};
pub use schema::CARIES_SCHEMA;
pub use types::{PredictionResult, RawRecord, ScoredRow};
