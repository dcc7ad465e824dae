//! Enumeration of the local backup directory.
//!
//! The directory is flat: only regular files directly inside it count as
//! backups. Symlinks are followed, so a link to an archive counts as that
//! archive; subdirectories and dangling links are ignored.

use crate::models::BackupFile;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// List the archives in `dir`, sorted by file name.
///
/// Returns an error when `dir` itself cannot be read. Unreadable entries and
/// paths that are not valid UTF-8 are logged and skipped.
pub fn list_local_backups(dir: &Path) -> std::io::Result<Vec<BackupFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(0)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.depth() == 0 || !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let (Some(name), Some(path)) = (entry.file_name().to_str(), entry.path().to_str()) else {
            tracing::warn!("Skipping non UTF-8 path {}", entry.path().display());
            continue;
        };

        let modified: DateTime<Utc> = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .into();

        files.push(BackupFile::new(name, path, metadata.len(), modified));
    }

    Ok(files)
}
