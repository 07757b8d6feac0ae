//! HTTP surface: `POST /predict` and `GET /health`

use crate::error::ScoringError;
use crate::metrics::ServingMetrics;
use crate::models::ScoredModel;
use crate::types::prediction::{ErrorResponse, PredictResponse};
use crate::types::record::RawRecord;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Shared request-handling state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ScoredModel>,
    pub metrics: Arc<ServingMetrics>,
}

impl AppState {
    pub fn new(model: ScoredModel) -> Self {
        Self {
            model: Arc::new(model),
            metrics: Arc::new(ServingMetrics::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

async fn predict(
    State(st): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    st.metrics.record_request();

    let Ok(Json(body)) = payload else {
        st.metrics.record_client_error();
        return error_response(StatusCode::BAD_REQUEST, "Request must be JSON");
    };
    let Some(record) = RawRecord::from_value(body) else {
        st.metrics.record_client_error();
        return error_response(StatusCode::BAD_REQUEST, "Request body must be a JSON object");
    };

    let start = Instant::now();
    let model = st.model.clone();
    let outcome = tokio::task::spawn_blocking(move || model.predict(std::slice::from_ref(&record))).await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Prediction task failed");
            st.metrics.record_prediction_failure();
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Not able to predict outcome");
        }
    };

    match result {
        Ok(prediction) => {
            st.metrics
                .record_unknown_categories(&prediction.unknown_categories);
            st.metrics.record_absent_fields(&prediction.absent_fields);
            let Some(row) = prediction.rows.first() else {
                st.metrics.record_prediction_failure();
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Not able to predict outcome");
            };
            st.metrics
                .record_prediction(start.elapsed(), row.probability, row.label);
            debug!(
                request_id = %request_id,
                probability = row.probability,
                prediction = row.label,
                "Prediction served"
            );
            (StatusCode::OK, Json(PredictResponse::success(row.label))).into_response()
        }
        Err(e) if e.is_client_error() => {
            st.metrics.record_client_error();
            warn!(request_id = %request_id, error = %e, "Rejected request input");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            st.metrics.record_prediction_failure();
            if !matches!(e, ScoringError::PredictionFailed { .. }) {
                error!(request_id = %request_id, error = %e, "Prediction unavailable");
            }
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health(State(st): State<AppState>) -> Response {
    let status = if st.model.is_loaded() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if status == StatusCode::OK { "ok" } else { "unavailable" },
        "model": st.model.reference().uri(),
    });
    (status, Json(body)).into_response()
}
