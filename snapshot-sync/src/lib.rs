//! Snapshot Sync Library
//!
//! Uploads local backup archives missing from a Dropbox folder and keeps the
//! last N backups both remotely and on the local snapshot host.

pub mod command;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod models;
pub mod remote;
pub mod retention;
pub mod retry;
pub mod snapshots;
pub mod sync;
pub mod transfer;
pub mod upload;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use sync::{SyncEngine, SyncReport, SyncSettings};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
