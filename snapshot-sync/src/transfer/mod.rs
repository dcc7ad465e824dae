//! Transfer bookkeeping for uploads.

pub mod progress;
