//! Remote object store abstraction.
//!
//! The sync engine and the chunked uploader only talk to [`RemoteStore`];
//! [`dropbox::DropboxClient`] is the production implementation.

pub mod dropbox;

use crate::models::{format_mb, BackupFile};
use crate::retention::{sort_newest_first, RetentionTarget};
use crate::retry::RetryPolicy;
use crate::utils::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

pub use dropbox::DropboxClient;

/// Name and size of an object the store created or deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub name: String,

    #[serde(default)]
    pub size: u64,
}

/// Authenticated account details
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub email: String,
}

/// Quota usage in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    pub used: u64,
    pub allocated: u64,
}

impl SpaceUsage {
    pub fn percent_used(&self) -> u64 {
        if self.allocated == 0 {
            return 0;
        }
        self.used.saturating_mul(100) / self.allocated
    }
}

impl fmt::Display for SpaceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Mb / {} Mb (Usage: {}%)",
            self.used / 1_000_000,
            self.allocated / 1_000_000,
            self.percent_used()
        )
    }
}

/// Server-side upload session plus the client-tracked byte offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCursor {
    pub session_id: String,
    pub offset: u64,
}

/// Primitive operations the sync engine needs from a remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Account behind the credentials; used to verify them at startup
    async fn current_account(&self) -> Result<Account>;

    async fn space_usage(&self) -> Result<SpaceUsage>;

    /// Files directly under `path`, in store order. Folders are skipped.
    async fn list_folder(&self, path: &str) -> Result<Vec<BackupFile>>;

    /// Store `data` as a single object at `path`
    async fn upload(&self, path: &str, data: Bytes) -> Result<RemoteObject>;

    /// Open a session with the first chunk, returning the session id
    async fn upload_session_start(&self, data: Bytes) -> Result<String>;

    async fn upload_session_append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()>;

    /// Send the last chunk and commit the session to `path`
    async fn upload_session_finish(
        &self,
        cursor: &UploadCursor,
        data: Bytes,
        path: &str,
    ) -> Result<RemoteObject>;

    async fn delete(&self, path: &str) -> Result<RemoteObject>;

    /// Listing of `path`, newest first
    async fn list(&self, path: &str) -> Result<Vec<BackupFile>> {
        let mut files = self.list_folder(path).await?;
        sort_newest_first(&mut files);
        Ok(files)
    }
}

/// Remote path of `name` inside `dir`. `dir` carries no trailing slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Backups in one remote folder, as a retention target
pub struct RemoteFolder<'a> {
    store: &'a dyn RemoteStore,
    path: &'a str,
    retry: &'a RetryPolicy,
}

impl<'a> RemoteFolder<'a> {
    pub fn new(store: &'a dyn RemoteStore, path: &'a str, retry: &'a RetryPolicy) -> Self {
        Self { store, path, retry }
    }
}

#[async_trait]
impl RetentionTarget for RemoteFolder<'_> {
    type Item = BackupFile;

    fn label(&self) -> &str {
        "remote"
    }

    fn describe(&self, item: &BackupFile) -> String {
        item.name.clone()
    }

    async fn list(&self) -> Result<Vec<BackupFile>> {
        self.store.list(self.path).await
    }

    async fn remove(&self, item: &BackupFile) -> Result<()> {
        let what = format!("deleting `{}`", item.path);
        let deleted = self
            .retry
            .run(&what, || self.store.delete(&item.path))
            .await?;
        info!(
            "Deleted `{}` from Dropbox. (Size: {})",
            deleted.name,
            format_mb(deleted.size)
        );
        Ok(())
    }
}
