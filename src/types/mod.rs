//! Type definitions shared by the encoder, the model and the server

pub mod prediction;
pub mod record;

pub use prediction::{ErrorResponse, PredictResponse, PredictionResult, ScoredRow};
pub use record::RawRecord;
