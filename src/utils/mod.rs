//! Shared utilities: errors, backoff, logging, HTTP plumbing.

pub mod backoff;
pub mod error;
pub mod http;
pub mod logger;

pub use backoff::Backoff;
pub use error::{AgentError, AgentResult};
pub use logger::init_logger;
