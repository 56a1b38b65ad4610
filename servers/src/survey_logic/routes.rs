//! # HTTP Routes
//!
//! - `GET /`: plain-text liveness message. Never touches the store.
//! - `POST /api/submit-survey`: maps the JSON body onto a survey and hands it
//!   to the `ResilientWriteService`. Responds 201 with the stored record.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use lib_survey::SurveySubmission;
use serde_json::{Value, json};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::survey_logic::error::ApiError;
use crate::survey_logic::state::AppState;

pub const LIVENESS_MESSAGE: &str = "Hello World!";
pub const SUBMIT_SUCCESS_MESSAGE: &str = "Survey submitted successfully";

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/api/submit-survey", post(submit_survey))
        .layer(cors)
        .with_state(state)
}

pub async fn liveness() -> &'static str {
    LIVENESS_MESSAGE
}

pub async fn submit_survey(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let started = Instant::now();

    let payload: Value = serde_json::from_slice(&body)?;
    info!("Received survey submission: {}", payload);
    let submission = SurveySubmission::from_json(&payload)?;

    let result = state.service.submit(submission).await;
    info!(
        "Survey request handled in {} ms",
        started.elapsed().as_millis()
    );

    let record = result?;
    debug!("Stored survey {}", record.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": SUBMIT_SUCCESS_MESSAGE, "survey": record })),
    ))
}
