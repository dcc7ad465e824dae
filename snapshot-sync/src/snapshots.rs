//! Local snapshot host: the supervisor API that owns the snapshot archives.

use crate::retention::{Dated, RetentionTarget};
use crate::retry::RetryPolicy;
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const TOKEN_HEADER: &str = "X-HASSIO-KEY";

/// One snapshot known to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub slug: String,

    pub date: DateTime<Utc>,

    #[serde(default)]
    pub name: Option<String>,

    /// Size in MB as reported by the host; informational
    #[serde(default)]
    pub size: Option<f64>,
}

impl Dated for Snapshot {
    fn date(&self) -> DateTime<Utc> {
        self.date
    }

    fn name(&self) -> &str {
        &self.slug
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotsEnvelope {
    data: SnapshotsData,
}

#[derive(Debug, Deserialize)]
struct SnapshotsData {
    snapshots: Vec<Snapshot>,
}

/// Operations the engine needs from the snapshot host
#[async_trait]
pub trait SnapshotHost: Send + Sync {
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>>;

    async fn remove_snapshot(&self, slug: &str) -> Result<()>;
}

/// HTTP client for the supervisor snapshot API
pub struct SupervisorClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl SupervisorClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }
}

#[async_trait]
impl SnapshotHost for SupervisorClient {
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let url = self.url("snapshots");
        debug!("GET {}", url);

        let response = self.authorized(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SnapshotHost(format!(
                "listing snapshots failed with status {}",
                status
            )));
        }

        let envelope: SnapshotsEnvelope = response.json().await?;
        Ok(envelope.data.snapshots)
    }

    async fn remove_snapshot(&self, slug: &str) -> Result<()> {
        let url = self.url(&format!("snapshots/{}/remove", slug));
        debug!("POST {}", url);

        let response = self.authorized(self.http.post(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SnapshotHost(format!(
                "removing snapshot `{}` failed with status {}",
                slug, status
            )));
        }

        Ok(())
    }
}

/// Snapshots on the local host, as a retention target
pub struct LocalSnapshots<'a> {
    host: &'a dyn SnapshotHost,
    retry: &'a RetryPolicy,
}

impl<'a> LocalSnapshots<'a> {
    pub fn new(host: &'a dyn SnapshotHost, retry: &'a RetryPolicy) -> Self {
        Self { host, retry }
    }
}

#[async_trait]
impl RetentionTarget for LocalSnapshots<'_> {
    type Item = Snapshot;

    fn label(&self) -> &str {
        "local"
    }

    fn describe(&self, item: &Snapshot) -> String {
        item.slug.clone()
    }

    async fn list(&self) -> Result<Vec<Snapshot>> {
        self.host.list_snapshots().await
    }

    async fn remove(&self, item: &Snapshot) -> Result<()> {
        let what = format!("removing snapshot `{}`", item.slug);
        self.retry
            .run(&what, || self.host.remove_snapshot(&item.slug))
            .await?;
        info!("Deleted snapshot `{}`", item.slug);
        Ok(())
    }
}
