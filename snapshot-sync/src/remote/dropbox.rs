//! Dropbox HTTP API v2 client.
//!
//! RPC endpoints take a JSON body; content endpoints carry their arguments in
//! the `Dropbox-API-Arg` header and the payload as an octet stream.

use super::{Account, RemoteObject, RemoteStore, SpaceUsage, UploadCursor};
use crate::config::DropboxConfig;
use crate::models::BackupFile;
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Entry returned by `files/list_folder` and `files/delete_v2`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File(FileMetadata),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct FileMetadata {
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
    client_modified: DateTime<Utc>,
    size: u64,
}

impl FileMetadata {
    fn into_backup_file(self) -> BackupFile {
        let path = self
            .path_lower
            .or(self.path_display)
            .unwrap_or_else(|| self.name.clone());
        BackupFile::new(self.name, path, self.size, self.client_modified)
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    metadata: RemoteObject,
}

#[derive(Debug, Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SpaceUsageResult {
    used: u64,
    allocation: Allocation,
}

/// Individual and team allocations both carry `allocated`
#[derive(Debug, Deserialize)]
struct Allocation {
    #[serde(default)]
    allocated: u64,
}

#[derive(Debug, Serialize)]
struct CommitInfo<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
}

impl<'a> CommitInfo<'a> {
    fn add(path: &'a str) -> Self {
        Self {
            path,
            mode: "add",
            autorename: false,
        }
    }
}

/// Dropbox client authenticated with a static OAuth access token
pub struct DropboxClient {
    http: reqwest::Client,
    token: String,
    api_url: String,
    content_url: String,
}

impl DropboxClient {
    pub fn new(token: impl Into<String>, config: &DropboxConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            content_url: config.content_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build a client and verify the token. Any failure here means the
    /// process must not continue.
    pub async fn connect(token: impl Into<String>, config: &DropboxConfig) -> Result<Self> {
        let client = Self::new(token, config);

        let account = client.current_account().await.map_err(|e| match e {
            SyncError::Authentication(msg) => SyncError::Authentication(msg),
            other => SyncError::Authentication(format!(
                "error logging into Dropbox, please check token: {}",
                other
            )),
        })?;

        info!("Logged in to Dropbox as user: {}", account.email);
        Ok(client)
    }

    async fn rpc<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: Option<serde_json::Value>,
    ) -> Result<R> {
        let url = format!("{}/{}", self.api_url, endpoint);
        debug!("Dropbox RPC {}", endpoint);

        let request = self.http.post(&url).bearer_auth(&self.token);
        let request = match arg {
            Some(arg) => request.json(&arg),
            None => request.header(CONTENT_TYPE, "application/json").body("null"),
        };

        let response = check(endpoint, request.send().await?).await?;
        Ok(response.json::<R>().await?)
    }

    async fn content(
        &self,
        endpoint: &str,
        arg: serde_json::Value,
        data: Bytes,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.content_url, endpoint);
        debug!("Dropbox content upload {} ({} bytes)", endpoint, data.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(API_ARG_HEADER, header_safe_json(&arg))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;

        check(endpoint, response).await
    }
}

/// Map non-2xx responses onto [`SyncError`]
async fn check(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SyncError::Authentication(format!("{}: {}", endpoint, message)));
    }

    Err(SyncError::Api {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

/// HTTP header values must be ASCII, so non-ASCII characters in the argument
/// are written as `\uXXXX` escapes (surrogate pairs above the BMP).
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl RemoteStore for DropboxClient {
    async fn current_account(&self) -> Result<Account> {
        self.rpc("users/get_current_account", None).await
    }

    async fn space_usage(&self) -> Result<SpaceUsage> {
        let usage: SpaceUsageResult = self.rpc("users/get_space_usage", None).await?;
        Ok(SpaceUsage {
            used: usage.used,
            allocated: usage.allocation.allocated,
        })
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<BackupFile>> {
        let mut page: ListFolderResult = self
            .rpc("files/list_folder", Some(json!({ "path": path })))
            .await?;
        let mut files = Vec::new();

        loop {
            files.extend(page.entries.into_iter().filter_map(|entry| match entry {
                Metadata::File(meta) => Some(meta.into_backup_file()),
                Metadata::Other => None,
            }));

            if !page.has_more {
                break;
            }
            page = self
                .rpc("files/list_folder/continue", Some(json!({ "cursor": page.cursor })))
                .await?;
        }

        Ok(files)
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<RemoteObject> {
        let arg = serde_json::to_value(CommitInfo::add(path))?;
        let response = self.content("files/upload", arg, data).await?;
        Ok(response.json().await?)
    }

    async fn upload_session_start(&self, data: Bytes) -> Result<String> {
        let response = self
            .content("files/upload_session/start", json!({ "close": false }), data)
            .await?;
        let started: SessionStartResult = response.json().await?;
        Ok(started.session_id)
    }

    async fn upload_session_append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()> {
        let arg = json!({ "cursor": cursor, "close": false });
        self.content("files/upload_session/append_v2", arg, data).await?;
        Ok(())
    }

    async fn upload_session_finish(
        &self,
        cursor: &UploadCursor,
        data: Bytes,
        path: &str,
    ) -> Result<RemoteObject> {
        let arg = json!({ "cursor": cursor, "commit": CommitInfo::add(path) });
        let response = self.content("files/upload_session/finish", arg, data).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<RemoteObject> {
        let result: DeleteResult = self.rpc("files/delete_v2", Some(json!({ "path": path }))).await?;
        Ok(result.metadata)
    }
}
