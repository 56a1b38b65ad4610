//! # Document Store Seam
//!
//! Everything above this module talks to the store through two traits:
//!
//! - `StoreConnector` opens a connection and hands back a live handle.
//! - `SurveyStore` is that handle. It is cheap to clone behind an `Arc` and is
//!   never held past a single operation by anything except the
//!   `ConnectionManager`.
//!
//! Errors are normalised into `StoreError` so that retry and status decisions
//! do not depend on a particular driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::survey::{NewSurvey, SurveyRecord};

/// The one logical collection this service writes to.
pub const SURVEY_COLLECTION: &str = "surveys";

/// Custom error types for document store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or no server could be selected.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// The write reached the store but the durability acknowledgment did not
    /// arrive within the write timeout.
    #[error("write concern not satisfied: {0}")]
    DurabilityTimeout(String),
    /// A unique index rejected the document.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// The store rejected the operation for any other reason.
    #[error("store rejected the operation: {0}")]
    Rejected(String),
    /// A document could not be converted to or from the store's format.
    #[error("document conversion failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True for failures where the store was never reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Connection-level options recognised by every connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// How long to wait for a suitable server before failing an operation.
    pub server_selection_timeout: Duration,
    /// Upper bound for a single round trip on an established socket.
    pub socket_timeout: Duration,
    /// Upper bound for opening a new socket.
    pub connect_timeout: Duration,
    /// Maximum number of pooled connections.
    pub max_pool_size: u32,
    /// Database that holds the survey collection.
    pub database: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            server_selection_timeout: Duration::from_millis(5000),
            socket_timeout: Duration::from_millis(45000),
            connect_timeout: Duration::from_millis(10000),
            max_pool_size: 10,
            database: "survey".to_string(),
        }
    }
}

/// Durability requirement attached to every insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durability {
    /// Require acknowledgment from a majority of replicas.
    pub majority: bool,
    /// Write-side timeout for the acknowledgment.
    pub timeout: Duration,
}

impl Default for Durability {
    fn default() -> Self {
        Self {
            majority: true,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// A live handle to the survey collection.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Round trip to the server without touching any collection.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Declares the secondary indexes of the survey collection.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Inserts one survey, honouring `durability`, and returns the stored form.
    async fn insert_survey(
        &self,
        draft: &NewSurvey,
        durability: &Durability,
    ) -> Result<SurveyRecord, StoreError>;

    /// Looks up the record written under `key`, if any.
    async fn find_by_idempotency_key(&self, key: Uuid)
        -> Result<Option<SurveyRecord>, StoreError>;

    /// A no-op lookup on the collection. The result is discarded.
    async fn probe(&self) -> Result<(), StoreError>;

    /// Resolves once this handle is no longer usable, with the reason.
    async fn closed(&self) -> StoreError;
}

/// Opens connections to a document store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Attempts a single connection to `target`.
    async fn connect(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn SurveyStore>, StoreError>;
}
