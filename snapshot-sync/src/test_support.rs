//! In-memory stand-ins for the remote store and the snapshot host.

use crate::models::BackupFile;
use crate::remote::{Account, RemoteObject, RemoteStore, SpaceUsage, UploadCursor};
use crate::snapshots::{Snapshot, SnapshotHost};
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub fn hour(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List { path: String },
    Upload { path: String, len: usize },
    SessionStart { len: usize },
    SessionAppend { session_id: String, offset: u64, len: usize },
    SessionFinish { session_id: String, offset: u64, len: usize, path: String },
    Delete { path: String },
    Usage,
}

fn api_error(endpoint: &str, message: impl Into<String>) -> SyncError {
    SyncError::Api {
        endpoint: endpoint.to_string(),
        status: 409,
        message: message.into(),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Remote store keeping objects in memory. Uploaded objects are stamped with
/// a clock that starts at hour 1000 and advances one hour per upload.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (BackupFile, Vec<u8>)>>,
    sessions: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<StoreCall>>,
    fail_uploads: Mutex<HashSet<String>>,
    fail_deletes: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object at `dir/name`
    pub fn insert(&self, dir: &str, name: &str, size: u64, modified: DateTime<Utc>) {
        let path = format!("{}/{}", dir, name).to_lowercase();
        let file = BackupFile::new(name, path.clone(), size, modified);
        self.objects
            .lock()
            .unwrap()
            .insert(path, (file, vec![0; size as usize]));
    }

    pub fn fail_uploads_of(&self, name: &str) {
        self.fail_uploads.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_deletes_of(&self, name: &str) {
        self.fail_deletes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .map(|(f, _)| f.name.clone())
            .collect()
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&path.to_lowercase())
            .map(|(_, data)| data.clone())
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn commit(&self, path: &str, data: Vec<u8>) -> Result<RemoteObject> {
        let name = file_name(path).to_string();
        if self.fail_uploads.lock().unwrap().contains(&name) {
            return Err(api_error("upload", format!("{} rejected", name)));
        }

        let mut objects = self.objects.lock().unwrap();
        let key = path.to_lowercase();
        if objects.contains_key(&key) {
            return Err(api_error("upload", "path/conflict/file"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let file = BackupFile::new(name.clone(), key.clone(), data.len() as u64, hour(1000 + n));
        let size = file.size;
        objects.insert(key, (file, data));
        Ok(RemoteObject { name, size })
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn current_account(&self) -> Result<Account> {
        Ok(Account {
            email: "test@example.com".to_string(),
        })
    }

    async fn space_usage(&self) -> Result<SpaceUsage> {
        self.record(StoreCall::Usage);
        let used = self
            .objects
            .lock()
            .unwrap()
            .values()
            .map(|(f, _)| f.size)
            .sum();
        Ok(SpaceUsage {
            used,
            allocated: 2_000_000_000,
        })
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<BackupFile>> {
        self.record(StoreCall::List { path: path.to_string() });
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(api_error("files/list_folder", "path/not_found"));
        }

        let dir = path.to_lowercase();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| parent(key) == dir)
            .map(|(_, (f, _))| f.clone())
            .collect())
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<RemoteObject> {
        self.record(StoreCall::Upload {
            path: path.to_string(),
            len: data.len(),
        });
        self.commit(path, data.to_vec())
    }

    async fn upload_session_start(&self, data: Bytes) -> Result<String> {
        self.record(StoreCall::SessionStart { len: data.len() });
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().unwrap().insert(id.clone(), data.to_vec());
        Ok(id)
    }

    async fn upload_session_append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()> {
        self.record(StoreCall::SessionAppend {
            session_id: cursor.session_id.clone(),
            offset: cursor.offset,
            len: data.len(),
        });

        let mut sessions = self.sessions.lock().unwrap();
        let buffer = sessions
            .get_mut(&cursor.session_id)
            .ok_or_else(|| api_error("append", "not_found"))?;
        if buffer.len() as u64 != cursor.offset {
            return Err(api_error("append", "incorrect_offset"));
        }
        buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn upload_session_finish(
        &self,
        cursor: &UploadCursor,
        data: Bytes,
        path: &str,
    ) -> Result<RemoteObject> {
        self.record(StoreCall::SessionFinish {
            session_id: cursor.session_id.clone(),
            offset: cursor.offset,
            len: data.len(),
            path: path.to_string(),
        });

        let mut buffer = {
            let mut sessions = self.sessions.lock().unwrap();
            let buffer = sessions
                .get(&cursor.session_id)
                .ok_or_else(|| api_error("finish", "not_found"))?;
            if buffer.len() as u64 != cursor.offset {
                return Err(api_error("finish", "incorrect_offset"));
            }
            sessions.remove(&cursor.session_id).unwrap_or_default()
        };
        buffer.extend_from_slice(&data);
        self.commit(path, buffer)
    }

    async fn delete(&self, path: &str) -> Result<RemoteObject> {
        self.record(StoreCall::Delete { path: path.to_string() });

        if self
            .fail_deletes
            .lock()
            .unwrap()
            .contains(file_name(path))
        {
            return Err(api_error("files/delete_v2", "too_many_write_operations"));
        }

        let (file, _) = self
            .objects
            .lock()
            .unwrap()
            .remove(&path.to_lowercase())
            .ok_or_else(|| api_error("files/delete_v2", "path_lookup/not_found"))?;
        Ok(RemoteObject {
            name: file.name,
            size: file.size,
        })
    }
}

/// Snapshot host keeping snapshots in memory
#[derive(Default)]
pub struct MemorySnapshotHost {
    snapshots: Mutex<Vec<Snapshot>>,
    rejected: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
}

impl MemorySnapshotHost {
    /// Snapshots given as `(slug, hour)`
    pub fn with_snapshots(items: &[(&str, i64)]) -> Self {
        let host = Self::default();
        *host.snapshots.lock().unwrap() = items
            .iter()
            .map(|(slug, h)| Snapshot {
                slug: slug.to_string(),
                date: hour(*h),
                name: None,
                size: None,
            })
            .collect();
        host
    }

    pub fn reject_remove(&self, slug: &str) {
        self.rejected.lock().unwrap().insert(slug.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn slugs(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.slug.clone())
            .collect()
    }
}

#[async_trait]
impl SnapshotHost for MemorySnapshotHost {
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SyncError::SnapshotHost("status 502".into()));
        }
        Ok(self.snapshots.lock().unwrap().clone())
    }

    async fn remove_snapshot(&self, slug: &str) -> Result<()> {
        if self.rejected.lock().unwrap().contains(slug) {
            return Err(SyncError::SnapshotHost(format!("status 400 for {}", slug)));
        }
        self.snapshots.lock().unwrap().retain(|s| s.slug != slug);
        Ok(())
    }
}

/// One HTTP request as received by [`HttpStub`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// e.g. `POST /2/files/list_folder`
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Minimal HTTP/1.1 server answering each connection with the next canned
/// `(status, body)` pair and closing it.
pub struct HttpStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub async fn serve(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                if let Some(request) = read_request(&mut stream).await {
                    recorded.lock().unwrap().push(request);
                }
                let reply = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.rsplit_once(' ')?.0.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        request_line,
        headers,
        body,
    })
}
