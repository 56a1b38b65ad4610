//! # Data Models
//!
//! The single persisted entity of the service and the payload mapping that
//! produces it.

/// Survey submissions, drafts and persisted records.
pub mod survey;
