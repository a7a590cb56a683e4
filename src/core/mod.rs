//! Core runtime pieces: configuration persistence.

pub mod config;

pub use config::{Config, DEFAULT_CLOUD_URL, MoonrakerPrinter};
