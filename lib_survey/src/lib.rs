//! # Survey Persistence Library
//!
//! The resilient write path behind the survey submission server. It owns a
//! lazily established, self-healing connection to a document store and
//! exposes a single write operation with a bounded retry policy, plus the
//! background keep-alive tasks that keep that connection warm.
//!
//! ## Layout:
//! - **`models`**: the persisted `SurveyRecord` and the lenient mapping from
//!   inbound JSON payloads.
//! - **`connections`**: the store seam (`StoreConnector` / `SurveyStore`), the
//!   MongoDB driver implementation (feature `mongo`) and an in-memory store.
//! - **`core`**: retry policies, the connection manager, the survey writer and
//!   the `ResilientWriteService` that ties them together.
//! - **`keepalive`**: the warm-up prober and the external self-pinger.
//! - **`utils`**: small helpers shared by the above.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
pub mod keepalive;
pub mod models;
pub mod utils;

// --- Public API Re-exports ---
pub use crate::connections::store::{
    ConnectOptions, Durability, StoreConnector, StoreError, SurveyStore, SURVEY_COLLECTION,
};
pub use crate::core::connection_manager::{ConnectionManager, ConnectionPhase};
pub use crate::core::retry_policy::{FixedDelay, RetryPolicy};
pub use crate::core::service::{ResilientWriteService, ServiceSettings};
pub use crate::core::survey_writer::{SubmitError, SurveyWriter};
pub use crate::models::survey::{NewSurvey, PayloadError, SurveyRecord, SurveySubmission};
