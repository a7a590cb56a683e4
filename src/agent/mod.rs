//! Agent orchestrator — pairing, then the cooperating periodic loops.
//!
//! 1. Load-time config is handed in already validated
//! 2. If a pairing_token is present, register with the cloud and atomically
//!    rewrite the config (token cleared, credentials set, printer_ids mapped)
//! 3. Build one Moonraker client per binding, keyed by printer_id
//! 4. Continuous mode: heartbeat, commands, snapshots and webcam loops run
//!    as peers, each with its own ticker and backoff
//! 5. One-shot mode: a single iteration of each loop, then exit

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cloud::types::{DeviceInfo, PrinterInfo, RegisterRequest};
use crate::cloud::{CloudClient, CloudClientOptions};
use crate::core::Config;
use crate::moonraker::MoonrakerClient;
use crate::utils::{AgentError, AgentResult, Backoff};

mod commands;
mod heartbeat;
mod snapshots;
mod webcam;

/// Per-loop backoff window.
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Webcam requests poll faster than snapshots for responsiveness.
const WEBCAM_POLL_SECONDS: u64 = 2;

pub struct AgentOptions {
    pub config_path: PathBuf,
    pub config: Config,
    pub version: String,
    pub once: bool,
}

/// Shared read-only state for the loops. Built once pairing has finished;
/// nothing here mutates afterwards, so the loops share it without locks.
pub(crate) struct AgentState {
    pub(crate) cfg: Config,
    pub(crate) cloud: CloudClient,
    pub(crate) moons: HashMap<i64, MoonrakerClient>,
    pub(crate) version: String,
    pub(crate) started_at: Instant,
}

pub struct Agent {
    config_path: PathBuf,
    cfg: Config,
    version: String,
    once: bool,
    cloud: CloudClient,
    started_at: Instant,
}

impl Agent {
    pub fn new(opts: AgentOptions) -> AgentResult<Self> {
        let user_agent = format!("printer-connector/{}", opts.version);
        let cloud = CloudClient::new(CloudClientOptions {
            base_url: opts.config.cloud_url.clone(),
            connector_id: opts.config.connector_id.clone(),
            connector_secret: opts.config.connector_secret.clone(),
            user_agent,
        })?;

        Ok(Self {
            config_path: opts.config_path,
            cfg: opts.config,
            version: opts.version,
            once: opts.once,
            cloud,
            started_at: Instant::now(),
        })
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> AgentResult<()> {
        if !self.cfg.pairing_token.is_empty() {
            self.pair().await?;
        }

        let mut moons = HashMap::new();
        for p in &self.cfg.moonraker {
            moons.insert(p.printer_id, MoonrakerClient::new(&p.base_url, p.ui_port)?);
        }

        tracing::info!(
            connector_id = %self.cfg.connector_id,
            cloud_url = %self.cfg.cloud_url,
            printers = self.cfg.moonraker.len(),
            "connector running"
        );

        let once = self.once;
        let state = Arc::new(AgentState {
            cfg: self.cfg,
            cloud: self.cloud,
            moons,
            version: self.version,
            started_at: self.started_at,
        });

        if once {
            return run_once(&state).await;
        }
        run_loops(state, shutdown).await
    }

    /// Exchange the pairing token for credentials and commit the rewritten
    /// config. Fatal on failure; the installer orchestrates retries.
    async fn pair(&mut self) -> AgentResult<()> {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let ip = local_ip_address::local_ip()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let printers: Vec<PrinterInfo> = self
            .cfg
            .moonraker
            .iter()
            .map(|m| PrinterInfo {
                name: m.name.clone(),
                ui_port: m.ui_port,
            })
            .collect();

        let req = RegisterRequest {
            pairing_token: self.cfg.pairing_token.clone(),
            site_name: self.cfg.site_name.clone(),
            device: DeviceInfo {
                hostname,
                arch: std::env::consts::ARCH.to_string(),
                os: std::env::consts::OS.to_string(),
                version: self.version.clone(),
                ip,
                ui_port: self.cfg.moonraker.first().and_then(|p| p.ui_port),
            },
            printers,
        };

        tracing::info!("pairing connector (register)");
        let resp = self.cloud.register(&req).await?;

        self.cfg.connector_id = resp.connector.id.to_string();
        self.cfg.connector_secret = resp.credentials.secret;
        self.cfg.pairing_token.clear();

        if resp.polling.commands_seconds > 0 {
            self.cfg.poll_commands_seconds = resp.polling.commands_seconds;
        }
        if resp.polling.snapshots_seconds > 0 {
            self.cfg.push_snapshots_seconds = resp.polling.snapshots_seconds;
        }

        // The cloud registers printers in request order; map ids by position
        for (i, printer) in resp.printers.iter().enumerate() {
            if let Some(binding) = self.cfg.moonraker.get_mut(i) {
                binding.printer_id = printer.id;
                tracing::info!(
                    name = %binding.name,
                    printer_id = printer.id,
                    cloud_name = %printer.name,
                    "mapped printer"
                );
            }
        }

        self.cfg.save_atomic(&self.config_path)?;

        self.cloud.set_credentials(
            self.cfg.connector_id.clone(),
            self.cfg.connector_secret.clone(),
        );
        tracing::info!(connector_id = %self.cfg.connector_id, "paired successfully");
        Ok(())
    }
}

/// One iteration of each loop, in order. Succeeds if any iteration did:
/// a partial failure still proves liveness to the installer.
async fn run_once(state: &Arc<AgentState>) -> AgentResult<()> {
    let mut failures = 0;
    for (name, result) in [
        ("heartbeat", state.send_heartbeat().await),
        ("commands", state.poll_and_execute_commands().await),
        ("snapshots", state.collect_and_push_snapshots().await),
        ("webcam", state.process_webcam_requests().await),
    ] {
        if let Err(e) = result {
            tracing::warn!(error = %e, "{name} iteration failed");
            failures += 1;
        }
    }

    if failures == 4 {
        return Err(AgentError::internal("all one-shot iterations failed"));
    }
    Ok(())
}

async fn run_loops(state: Arc<AgentState>, shutdown: CancellationToken) -> AgentResult<()> {
    let mut set = JoinSet::new();

    {
        let st = state.clone();
        let period = Duration::from_secs(st.cfg.heartbeat_seconds);
        set.spawn(run_loop("heartbeat", period, shutdown.clone(), move || {
            let st = st.clone();
            async move { st.send_heartbeat().await }
        }));
    }
    {
        let st = state.clone();
        let period = Duration::from_secs(st.cfg.poll_commands_seconds);
        set.spawn(run_loop("commands", period, shutdown.clone(), move || {
            let st = st.clone();
            async move { st.poll_and_execute_commands().await }
        }));
    }
    {
        let st = state.clone();
        let period = Duration::from_secs(st.cfg.push_snapshots_seconds);
        set.spawn(run_loop("snapshots", period, shutdown.clone(), move || {
            let st = st.clone();
            async move { st.collect_and_push_snapshots().await }
        }));
    }
    {
        let st = state.clone();
        let period = Duration::from_secs(WEBCAM_POLL_SECONDS);
        set.spawn(run_loop("webcam", period, shutdown.clone(), move || {
            let st = st.clone();
            async move { st.process_webcam_requests().await }
        }));
    }

    let mut result = Ok(());
    while let Some(joined) = set.join_next().await {
        let loop_result = match joined {
            Ok(r) => r,
            Err(e) => Err(AgentError::internal(format!("loop task failed: {e}"))),
        };
        if let Err(e) = loop_result
            && result.is_ok()
        {
            // A loop died outside of shutdown: bring the rest down too
            result = Err(e);
            shutdown.cancel();
        }
    }
    result
}

/// Drive one loop: iterate, back off on failure, wait out the ticker,
/// return cleanly on shutdown. In-flight iterations are dropped at cancel.
async fn run_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut iteration: F,
) -> AgentResult<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = AgentResult<()>> + Send,
{
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await; // the first tick completes immediately

    let mut backoff = Backoff::new(BACKOFF_MIN, BACKOFF_MAX);

    loop {
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            outcome = iteration() => outcome,
        };

        match outcome {
            Ok(()) => backoff.reset(),
            Err(e) => {
                tracing::warn!(error = %e, "{name} iteration failed");
                let delay = backoff.next();
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tick.tick() => {}
        }
    }
}
