//! Byte-level progress tracking for chunked uploads.

use std::time::{Duration, Instant};

/// Progress of one upload, advanced chunk by chunk
#[derive(Debug, Clone)]
pub struct UploadProgress {
    /// Total bytes to transfer
    pub total_bytes: u64,

    /// Bytes acknowledged by the store so far
    pub transferred_bytes: u64,

    /// Average transfer speed since the upload started
    pub bytes_per_second: u64,

    started: Instant,
}

impl UploadProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            started: Instant::now(),
        }
    }

    /// Record the new cursor position
    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes.min(self.total_bytes);

        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_per_second = (self.transferred_bytes as f64 / elapsed) as u64;
        }
    }

    /// Percentage complete (0-100)
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
