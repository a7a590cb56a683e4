//! printer-connector — LAN agent bridging Moonraker printer controllers to
//! the cloud control plane.
//!
//! The agent pairs once with the cloud, then runs cooperating loops that
//! heartbeat, push status snapshots, and execute cloud-issued commands
//! against the local printer service. See the `agent` module for the
//! orchestration and `core::config` for the persistence contract.

pub mod agent;
pub mod backup;
pub mod cloud;
pub mod core;
pub mod moonraker;
pub mod utils;

pub use agent::{Agent, AgentOptions};
pub use core::Config;
pub use utils::{AgentError, AgentResult};
