//! # Connections Module
//!
//! This module handles the persistent connection to the document store that
//! holds survey records.

/// The store seam: connector and handle traits, options and errors.
pub mod store;

/// MongoDB implementation of the store seam.
#[cfg(feature = "mongo")]
pub mod db_mongo;

/// In-process store with failure injection, used to exercise the write path.
pub mod memory_store;
