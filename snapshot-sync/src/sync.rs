//! One synchronization cycle.
//!
//! A cycle lists both sides from scratch, uploads the local archives whose
//! names are missing remotely, trims the remote folder, then trims the local
//! snapshot host. Steps run strictly in that order and every per-item failure
//! is logged and skipped. Nothing is carried over between cycles.
//!
//! Archives are matched by name only. A remote object with the same name but
//! different content is never replaced.

use crate::config::Config;
use crate::fs::listing::list_local_backups;
use crate::models::BackupFile;
use crate::remote::{RemoteFolder, RemoteStore};
use crate::retention::{apply_retention, RetentionOutcome};
use crate::retry::RetryPolicy;
use crate::snapshots::{LocalSnapshots, SnapshotHost};
use crate::upload::ChunkedUploader;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Settings a cycle needs, taken from [`Config`]
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub backup_dir: PathBuf,
    pub remote_path: String,
    pub keep_local: usize,
    pub keep_remote: usize,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            remote_path: config.remote_path.clone(),
            keep_local: config.number_to_keep_local,
            keep_remote: config.number_to_keep_remote,
            chunk_size: config.chunk_size,
            retry: config.retry.clone(),
        }
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub cycle_id: String,
    pub local_files: usize,
    pub remote_files: usize,
    pub to_upload: usize,
    pub uploaded: Vec<String>,
    pub upload_failures: Vec<String>,
    pub remote_retention: RetentionOutcome,
    pub local_retention: RetentionOutcome,
    pub duration: Duration,
}

/// Local files whose names do not appear in the remote listing, in local order
pub fn files_to_upload<'a>(local: &'a [BackupFile], remote: &[BackupFile]) -> Vec<&'a BackupFile> {
    let remote_names: HashSet<&str> = remote.iter().map(|f| f.name.as_str()).collect();
    local
        .iter()
        .filter(|f| !remote_names.contains(f.name.as_str()))
        .collect()
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    host: Arc<dyn SnapshotHost>,
    settings: SyncSettings,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        host: Arc<dyn SnapshotHost>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            remote,
            host,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    /// Run a full cycle. Concurrent callers wait for the running cycle to end.
    pub async fn run_once(&self) -> SyncReport {
        let _guard = self.run_lock.lock().await;

        let cycle_id = Uuid::new_v4().to_string();
        let span = info_span!("sync", cycle = %cycle_id);
        self.run_cycle(cycle_id).instrument(span).await
    }

    async fn run_cycle(&self, cycle_id: String) -> SyncReport {
        let started = Instant::now();
        let settings = &self.settings;
        let mut report = SyncReport {
            cycle_id,
            ..Default::default()
        };

        self.report_usage().await;

        let local = self.list_local(&settings.backup_dir).await;
        let remote = match self.remote.list(&settings.remote_path).await {
            Ok(files) => files,
            Err(e) => {
                error!(
                    "Error listing files on Dropbox, please check path setting `{}`: {}",
                    settings.remote_path, e
                );
                Vec::new()
            }
        };
        report.local_files = local.len();
        report.remote_files = remote.len();

        let pending = files_to_upload(&local, &remote);
        report.to_upload = pending.len();
        info!("Need to sync {} file(s).", pending.len());

        let uploader = ChunkedUploader::new(self.remote.as_ref(), settings.chunk_size);
        for file in pending {
            let source = Path::new(&file.path);
            let what = format!("uploading `{}`", file.name);
            let result = settings
                .retry
                .run(&what, || uploader.upload(&settings.remote_path, source))
                .await;

            match result {
                Ok(Some(_)) => report.uploaded.push(file.name.clone()),
                Ok(None) => {}
                Err(e) => {
                    error!("Error while uploading `{}` to Dropbox: {}", file.name, e);
                    report.upload_failures.push(file.name.clone());
                }
            }
        }

        let remote_folder =
            RemoteFolder::new(self.remote.as_ref(), &settings.remote_path, &settings.retry);
        report.remote_retention = apply_retention(&remote_folder, settings.keep_remote).await;

        self.report_usage().await;

        let snapshots = LocalSnapshots::new(self.host.as_ref(), &settings.retry);
        report.local_retention = apply_retention(&snapshots, settings.keep_local).await;

        report.duration = started.elapsed();
        info!(
            "Sync finished in {:.1}s: {} uploaded, {} upload failures, {} remote and {} local backups removed",
            report.duration.as_secs_f64(),
            report.uploaded.len(),
            report.upload_failures.len(),
            report.remote_retention.evicted.len(),
            report.local_retention.evicted.len()
        );

        report
    }

    async fn list_local(&self, dir: &Path) -> Vec<BackupFile> {
        let dir_owned = dir.to_path_buf();
        match tokio::task::spawn_blocking(move || list_local_backups(&dir_owned)).await {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                error!(
                    "Error listing files in {}, please check your config: {}",
                    dir.display(),
                    e
                );
                Vec::new()
            }
            Err(e) => {
                error!("Local listing task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Log current quota usage; failures only warn
    pub async fn report_usage(&self) {
        match self.remote.space_usage().await {
            Ok(usage) => info!("Dropbox usage: {}", usage),
            Err(e) => warn!("Could not read Dropbox usage: {}", e),
        }
    }
}
