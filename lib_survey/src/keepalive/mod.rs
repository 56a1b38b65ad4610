//! # Keep-Alive Tasks
//!
//! Two independent, self-scheduling background loops. Neither has a caller:
//! every failure is logged and absorbed, and neither can affect request
//! handling.
//!
//! - **`warmup_prober`**: runs a no-op lookup against the survey collection on
//!   a fixed interval so the connection pool never goes cold.
//! - **`self_pinger`**: sends an outbound GET to the service's own public
//!   address so an idle-suspending host keeps the process awake.

/// Periodic no-op reads against the live store handle.
pub mod warmup_prober;
/// Periodic outbound requests to the service's own public address.
pub mod self_pinger;

pub use self_pinger::SelfPinger;
pub use warmup_prober::WarmupProber;
