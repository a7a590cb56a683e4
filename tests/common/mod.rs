//! Shared fixtures for the end-to-end tests: a paired config and a helper
//! that runs the agent in one-shot mode against mock servers.
#![allow(dead_code)]

use std::path::Path;
use tokio_util::sync::CancellationToken;

use printer_connector::agent::{Agent, AgentOptions};
use printer_connector::core::{Config, MoonrakerPrinter};

pub const TEST_VERSION: &str = "0.1.0";

/// A config that already carries credentials (connector 7 / secret S).
pub fn paired_config(cloud_url: &str, bindings: &[(i64, &str)], state_dir: &str) -> Config {
    Config {
        cloud_url: cloud_url.to_string(),
        pairing_token: String::new(),
        connector_id: "7".to_string(),
        connector_secret: "S".to_string(),
        site_name: String::new(),
        poll_commands_seconds: 3,
        push_snapshots_seconds: 30,
        heartbeat_seconds: 10,
        state_dir: state_dir.to_string(),
        moonraker: bindings
            .iter()
            .map(|(id, url)| MoonrakerPrinter {
                printer_id: *id,
                name: format!("K{id}"),
                base_url: url.to_string(),
                ui_port: None,
            })
            .collect(),
    }
}

/// Run one iteration of every loop and return the agent's verdict.
pub async fn run_once(config: Config, config_path: &Path) -> printer_connector::AgentResult<()> {
    config.validate().expect("test config must validate");
    let agent = Agent::new(AgentOptions {
        config_path: config_path.to_path_buf(),
        config,
        version: TEST_VERSION.to_string(),
        once: true,
    })
    .expect("agent construction");
    agent.run(CancellationToken::new()).await
}
