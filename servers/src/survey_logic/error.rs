//! # API Error
//!
//! Maps failures of the submit route onto status codes and the JSON bodies
//! clients rely on:
//!
//! | Variant | Status | Body |
//! |---|---|---|
//! | `BadPayload` | 400 | `{message, error}` |
//! | `Submit(ServiceUnavailable)` | 503 | `{message}` |
//! | `Submit(WriteFailed)` | 500 | `{message, error}` |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_survey::{PayloadError, SubmitError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub const SUBMIT_ERROR_MESSAGE: &str = "Error submitting survey";
pub const UNAVAILABLE_MESSAGE: &str = "Database connection error. Please try again later.";

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body is not JSON at all.
    #[error("invalid JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),
    /// The body is JSON but cannot be mapped onto a survey.
    #[error("invalid survey payload: {0}")]
    BadPayload(#[from] PayloadError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedJson(_) | ApiError::BadPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Submit(SubmitError::ServiceUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Submit(SubmitError::WriteFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::MalformedJson(e) => {
                error!("Rejected survey with malformed JSON: {}", e);
                json!({ "message": SUBMIT_ERROR_MESSAGE, "error": e.to_string() })
            }
            ApiError::BadPayload(e) => {
                error!("Rejected survey payload: {}", e);
                json!({ "message": SUBMIT_ERROR_MESSAGE, "error": e.to_string() })
            }
            ApiError::Submit(SubmitError::ServiceUnavailable(e)) => {
                error!("Survey not stored, document store unreachable: {}", e);
                json!({ "message": UNAVAILABLE_MESSAGE })
            }
            ApiError::Submit(SubmitError::WriteFailed(e)) => {
                error!("Error submitting survey: {}", e);
                json!({ "message": SUBMIT_ERROR_MESSAGE, "error": e.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}
