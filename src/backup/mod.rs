//! Content-addressed backup archive builder.

pub mod archiver;

pub use archiver::{BackupOptions, BackupResult, create};
