//! # Core Write Path
//!
//! The pieces that turn a survey submission into a durably stored record while
//! the store connection comes and goes.
//!
//! ## Core Components:
//!
//! - **`retry_policy`**: the `RetryPolicy` seam and the `FixedDelay` policy
//!   used for both reconnection and write retries.
//!
//! - **`connection_manager`**: owns the single logical store connection, moves
//!   it through `Disconnected`, `Connecting` and `Connected`, and reconnects
//!   after failures and drops.
//!
//! - **`survey_writer`**: the write operation. Acquires the live handle,
//!   inserts with majority durability and retries on a fixed schedule.
//!
//! - **`service`**: `ResilientWriteService`, which wires the above together
//!   with the keep-alive tasks and gives them one start/stop lifecycle.

/// Retry decisions and delays.
pub mod retry_policy;
/// The self-healing store connection.
pub mod connection_manager;
/// The survey write operation with bounded retries.
pub mod survey_writer;
/// Lifecycle owner for the connection, writer and keep-alive tasks.
pub mod service;

// --- Public API Re-exports ---
pub use connection_manager::{ConnectionManager, ConnectionPhase};
pub use retry_policy::{FixedDelay, RetryPolicy};
pub use service::{ResilientWriteService, ServiceSettings};
pub use survey_writer::{SubmitError, SurveyWriter};
