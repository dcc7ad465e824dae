//! "Keep last N" retention.
//!
//! [`evict`] is the pure policy. [`apply_retention`] runs it against any
//! [`RetentionTarget`]: the remote backup folder and the local snapshot host
//! both implement that trait.

use crate::models::BackupFile;
use crate::utils::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{error, info};

/// An item with a date that orders it inside a listing
pub trait Dated {
    fn date(&self) -> DateTime<Utc>;

    /// Secondary key for items sharing a date
    fn name(&self) -> &str;
}

impl Dated for BackupFile {
    fn date(&self) -> DateTime<Utc> {
        self.modified
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn newest_first<T: Dated>(a: &T, b: &T) -> Ordering {
    b.date().cmp(&a.date()).then_with(|| a.name().cmp(b.name()))
}

/// Sort by date descending; equal dates fall back to name ascending.
pub fn sort_newest_first<T: Dated>(items: &mut [T]) {
    items.sort_by(newest_first);
}

/// Items to remove from a newest-first listing so that only `keep` remain.
pub fn evict<T>(items: &[T], keep: usize) -> &[T] {
    if keep >= items.len() {
        &[]
    } else {
        &items[keep..]
    }
}

/// A dated collection that can delete its members.
#[async_trait]
pub trait RetentionTarget: Send + Sync {
    type Item: Dated + Send + Sync;

    /// "remote" or "local", used in log lines
    fn label(&self) -> &str;

    /// Human-readable identifier of an item for log lines
    fn describe(&self, item: &Self::Item) -> String;

    async fn list(&self) -> Result<Vec<Self::Item>>;

    async fn remove(&self, item: &Self::Item) -> Result<()>;
}

/// Result of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub listed: usize,
    pub evicted: Vec<String>,
    pub failed: Vec<String>,
}

/// List `target`, then delete everything past the newest `keep` items.
///
/// Each deletion is independent: a failure is logged and the pass moves on.
/// A listing failure leaves nothing to evict.
pub async fn apply_retention<T: RetentionTarget + ?Sized>(
    target: &T,
    keep: usize,
) -> RetentionOutcome {
    let mut outcome = RetentionOutcome::default();

    let mut items = match target.list().await {
        Ok(items) => items,
        Err(e) => {
            error!("Error listing {} backups, skipping retention: {}", target.label(), e);
            return outcome;
        }
    };
    sort_newest_first(&mut items);
    outcome.listed = items.len();

    let to_remove = evict(&items, keep);
    if to_remove.is_empty() {
        info!(
            "Keeping last {} {} backups, no need to remove any.",
            keep,
            target.label()
        );
        return outcome;
    }

    info!(
        "Keeping last {} {} backups will remove {} files.",
        keep,
        target.label(),
        to_remove.len()
    );

    for item in to_remove {
        let id = target.describe(item);
        match target.remove(item).await {
            Ok(()) => outcome.evicted.push(id),
            Err(e) => {
                error!("Error deleting {} backup `{}`: {}", target.label(), id, e);
                outcome.failed.push(id);
            }
        }
    }

    outcome
}
