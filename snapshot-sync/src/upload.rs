//! Chunked upload of one local archive to the remote store.
//!
//! Files up to `chunk_size` bytes go up in a single request. Larger files are
//! sent through an upload session: the first chunk opens it, middle chunks are
//! appended at the cursor, and the last chunk (at most `chunk_size` bytes)
//! finishes the session and commits the object. Any failure abandons the
//! session; the store discards it on its own.

use crate::models::format_mb;
use crate::remote::{join_remote, RemoteObject, RemoteStore, UploadCursor};
use crate::transfer::progress::{format_speed, UploadProgress};
use crate::utils::{Result, SyncError};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Default chunk size: 4 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub struct ChunkedUploader<'a> {
    store: &'a dyn RemoteStore,
    chunk_size: usize,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(store: &'a dyn RemoteStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Upload `source` into `destination_dir`, keeping its file name.
    ///
    /// A missing or empty source is skipped without touching the store and
    /// yields `Ok(None)`.
    pub async fn upload(&self, destination_dir: &str, source: &Path) -> Result<Option<RemoteObject>> {
        let file_size = match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                debug!("Skipping `{}`: not a regular file", source.display());
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Skipping `{}`: file does not exist", source.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if file_size == 0 {
            debug!("Skipping `{}`: file is empty", source.display());
            return Ok(None);
        }

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::InvalidPath(source.display().to_string()))?;
        let destination = join_remote(destination_dir, file_name);

        let mut file = File::open(source).await?;
        let chunk_size = self.chunk_size as u64;

        let result = if file_size <= chunk_size {
            let data = read_chunk(&mut file, file_size).await?;
            self.store.upload(&destination, data).await?
        } else {
            self.upload_session(&mut file, file_name, file_size, &destination)
                .await?
        };

        info!("Uploaded `{}` (Size: {})", result.name, format_mb(result.size));
        Ok(Some(result))
    }

    async fn upload_session(
        &self,
        file: &mut File,
        file_name: &str,
        file_size: u64,
        destination: &str,
    ) -> Result<RemoteObject> {
        let chunk_size = self.chunk_size as u64;
        let mut progress = UploadProgress::new(file_size);

        let first = read_chunk(file, chunk_size).await?;
        let first_len = first.len() as u64;
        let session_id = self.store.upload_session_start(first).await?;
        let mut cursor = UploadCursor {
            session_id,
            offset: first_len,
        };
        debug!("Opened upload session {} for `{}`", cursor.session_id, file_name);

        while file_size - cursor.offset > chunk_size {
            let chunk = read_chunk(file, chunk_size).await?;
            let len = chunk.len() as u64;
            self.store.upload_session_append(&cursor, chunk).await?;
            cursor.offset += len;

            progress.update(cursor.offset);
            info!(
                "Uploading `{}`, progress: {:.0} % ({})",
                file_name,
                progress.percent(),
                format_speed(progress.bytes_per_second)
            );
        }

        let last = read_chunk(file, file_size - cursor.offset).await?;
        self.store
            .upload_session_finish(&cursor, last, destination)
            .await
    }
}

/// Read exactly `len` bytes, failing if the file ends early.
async fn read_chunk(file: &mut File, len: u64) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(len as usize);
    (&mut *file).take(len).read_to_end(&mut buf).await?;

    if (buf.len() as u64) < len {
        return Err(SyncError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("file shrank while uploading: expected {} bytes, read {}", len, buf.len()),
        )));
    }

    Ok(Bytes::from(buf))
}
