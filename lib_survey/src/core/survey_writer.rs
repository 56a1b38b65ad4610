//! # Survey Writer
//!
//! Persists one survey per call, tolerating short store outages.
//!
//! Every attempt acquires the live handle from the `ConnectionManager`
//! (waiting up to the server selection timeout), then inserts with the
//! configured durability requirement. A failed attempt is retried after the
//! policy's fixed delay until the policy stops it; the error of the last
//! attempt decides the outcome:
//!
//! - connectivity errors become `SubmitError::ServiceUnavailable`,
//! - anything else becomes `SubmitError::WriteFailed`.
//!
//! The draft carries an idempotency key that is fixed before the first
//! attempt. If an earlier attempt was written but its acknowledgment was lost,
//! the retry hits the unique key and resolves to the stored record instead of
//! inserting a second copy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::connections::store::{Durability, StoreError, SurveyStore};
use crate::core::connection_manager::ConnectionManager;
use crate::core::retry_policy::RetryPolicy;
use crate::models::survey::{NewSurvey, SurveyRecord, SurveySubmission};

/// Final outcome of a write whose attempts were all spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The store was never reached. Callers may retry later.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(StoreError),
    /// The store was reached but the write did not succeed.
    #[error("write failed: {0}")]
    WriteFailed(StoreError),
}

impl SubmitError {
    fn from_final(error: StoreError) -> Self {
        if error.is_connectivity() {
            SubmitError::ServiceUnavailable(error)
        } else {
            SubmitError::WriteFailed(error)
        }
    }

    /// The store error of the last attempt.
    pub fn source_error(&self) -> &StoreError {
        match self {
            SubmitError::ServiceUnavailable(e) | SubmitError::WriteFailed(e) => e,
        }
    }
}

pub struct SurveyWriter {
    manager: Arc<ConnectionManager>,
    policy: Arc<dyn RetryPolicy>,
    durability: Durability,
}

impl SurveyWriter {
    pub fn new(
        manager: Arc<ConnectionManager>,
        policy: Arc<dyn RetryPolicy>,
        durability: Durability,
    ) -> Self {
        Self {
            manager,
            policy,
            durability,
        }
    }

    /// Stores `submission` and returns the persisted record.
    pub async fn submit(&self, submission: SurveySubmission) -> Result<SurveyRecord, SubmitError> {
        let draft = NewSurvey::from_submission(submission, Uuid::new_v4());
        self.write(&draft).await
    }

    /// Stores an already frozen draft. Retries reuse its idempotency key.
    pub async fn write(&self, draft: &NewSurvey) -> Result<SurveyRecord, SubmitError> {
        let selection_wait = self.manager.options().server_selection_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match self.manager.acquire(selection_wait).await {
                Ok(store) => self.attempt(store.as_ref(), draft).await,
                Err(e) => Err(e),
            };
            info!(
                "Database operation attempt {} took {} ms",
                attempt,
                started.elapsed().as_millis()
            );

            let error = match result {
                Ok(record) => {
                    info!(
                        "Survey {} saved successfully on attempt {}",
                        record.id, attempt
                    );
                    return Ok(record);
                }
                Err(e) => e,
            };

            if !self.policy.should_retry(attempt, &error) {
                warn!("Survey write failed after {} attempts: {}", attempt, error);
                return Err(SubmitError::from_final(error));
            }

            let delay: Duration = self.policy.delay_for(attempt);
            warn!(
                "Survey write attempt {} failed: {}. Retrying in {:?}",
                attempt, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        store: &dyn SurveyStore,
        draft: &NewSurvey,
    ) -> Result<SurveyRecord, StoreError> {
        match store.insert_survey(draft, &self.durability).await {
            Err(StoreError::DuplicateKey(detail)) => {
                // An earlier attempt may already hold this key.
                match store.find_by_idempotency_key(draft.idempotency_key).await? {
                    Some(existing) => {
                        info!(
                            "Survey {} was already stored by an earlier attempt",
                            existing.id
                        );
                        Ok(existing)
                    }
                    None => Err(StoreError::DuplicateKey(detail)),
                }
            }
            other => other,
        }
    }
}
