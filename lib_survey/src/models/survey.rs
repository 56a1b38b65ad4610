//! # Survey Records
//!
//! A submission goes through three shapes:
//!
//! 1. `SurveySubmission`: whatever the client sent, mapped leniently onto the
//!    schema fields. Unknown fields are dropped, scalar values are cast the way
//!    a document schema would cast them, and values that cannot be cast are
//!    rejected with a `PayloadError`.
//! 2. `NewSurvey`: the submission plus a client-generated idempotency key and
//!    a `submittedAt` that is fixed before the first write attempt, so every
//!    retry writes the same logical document.
//! 3. `SurveyRecord`: the document as persisted, with the store-assigned
//!    identifier and the `createdAt` / `updatedAt` stamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while mapping an inbound payload onto the survey schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("survey payload must be a JSON object")]
    NotAnObject,
    #[error("cast to {expected} failed for value {value} at path \"{path}\"")]
    Cast {
        path: String,
        expected: &'static str,
        value: String,
    },
}

/// A survey as submitted by a client, after schema casting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveySubmission {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub selected_projects: Vec<i64>,
    /// Free-form value, kept verbatim.
    pub comments: Option<Value>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SurveySubmission {
    /// Maps an arbitrary JSON payload onto the schema fields.
    ///
    /// Missing and `null` fields fall back to their defaults. Fields that are
    /// not part of the schema are ignored rather than rejected.
    pub fn from_json(payload: &Value) -> Result<Self, PayloadError> {
        let fields = payload.as_object().ok_or(PayloadError::NotAnObject)?;

        Ok(Self {
            user_name: cast_string(fields, "userName")?,
            user_email: cast_string(fields, "userEmail")?,
            selected_projects: cast_projects(fields)?,
            comments: fields.get("comments").cloned(),
            submitted_at: cast_timestamp(fields, "submittedAt")?,
        })
    }
}

/// A submission that is ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSurvey {
    /// Client-generated key that lets a retried insert recognise its own
    /// earlier, already acknowledged attempt.
    pub idempotency_key: Uuid,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub selected_projects: Vec<i64>,
    pub comments: Option<Value>,
    pub submitted_at: DateTime<Utc>,
}

impl NewSurvey {
    /// Freezes a submission for writing, defaulting `submitted_at` to now.
    pub fn from_submission(submission: SurveySubmission, idempotency_key: Uuid) -> Self {
        Self {
            idempotency_key,
            user_name: submission.user_name,
            user_email: submission.user_email,
            selected_projects: submission.selected_projects,
            comments: submission.comments,
            submitted_at: submission.submitted_at.unwrap_or_else(Utc::now),
        }
    }
}

/// A persisted survey document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    /// Identifier assigned by the store.
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default)]
    pub selected_projects: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Value>,
    pub submitted_at: DateTime<Utc>,
    pub idempotency_key: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SurveyRecord {
    /// Builds the persisted form of `draft`, stamping both timestamps with `now`.
    pub fn from_draft(id: String, draft: &NewSurvey, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_name: draft.user_name.clone(),
            user_email: draft.user_email.clone(),
            selected_projects: draft.selected_projects.clone(),
            comments: draft.comments.clone(),
            submitted_at: draft.submitted_at,
            idempotency_key: draft.idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

fn cast_error(path: impl Into<String>, expected: &'static str, value: &Value) -> PayloadError {
    PayloadError::Cast {
        path: path.into(),
        expected,
        value: value.to_string(),
    }
}

fn cast_string(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, PayloadError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(cast_error(key, "String", other)),
    }
}

fn cast_integer(path: String, value: &Value) -> Result<i64, PayloadError> {
    let cast = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    cast.ok_or_else(|| cast_error(path, "Number", value))
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn cast_projects(fields: &Map<String, Value>) -> Result<Vec<i64>, PayloadError> {
    const KEY: &str = "selectedProjects";
    match fields.get(KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| cast_integer(format!("{KEY}.{i}"), item))
            .collect(),
        // A lone scalar is treated as a one-element array.
        Some(single) => Ok(vec![cast_integer(format!("{KEY}.0"), single)?]),
    }
}

/// Accepts RFC 3339, or a date or date-time without offset read as UTC.
fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn cast_timestamp(
    fields: &Map<String, Value>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, PayloadError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_date_string(s.trim())
            .map(Some)
            .ok_or_else(|| cast_error(key, "Date", &Value::String(s.clone()))),
        Some(v @ Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(Some)
            .ok_or_else(|| cast_error(key, "Date", v)),
        Some(other) => Err(cast_error(key, "Date", other)),
    }
}
