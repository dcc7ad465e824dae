//! Local backup directory access.

pub mod listing;
