//! Utility modules for the snapshot sync engine.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
