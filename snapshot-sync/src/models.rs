//! Listing entries shared by the local directory and the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One backup archive, local or remote.
///
/// `name` is the only identity used when diffing the two sides; `modified`
/// orders listings and is never compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    pub name: String,

    /// Local filesystem path or lower-cased remote path
    pub path: String,

    pub size: u64,

    pub modified: DateTime<Utc>,
}

impl BackupFile {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
            modified,
        }
    }
}

/// Megabytes (10^6 bytes) with two decimals, the unit used in sync logs
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} Mb", bytes as f64 / 1_000_000.0)
}
