// pca/src/daemon/mod.rs
//! Long-running agent: HTTP and RPC listeners plus the periodic units.
pub mod http;
pub mod rpc;
pub mod units;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pca_common::config::Settings;
use pca_common::error::Result;
use pca_common::model::InstalledRecord;
use pca_core::{Agent, AppUpdate, AppUpdateQuery, LogBuffer, OperationLock, Scheduler};
use pca_net::ControlPlane;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cli::build_agent;

const UPSTREAM_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Parts of the agent the HTTP handlers and the log flush read without
/// waiting for a running operation to release the agent.
struct AgentView {
    control: Arc<dyn ControlPlane>,
    logs: Arc<LogBuffer>,
    records: Vec<InstalledRecord>,
}

impl AgentView {
    fn of(agent: &Agent) -> Self {
        Self {
            control: agent.control(),
            logs: agent.log_buffer(),
            records: agent.ledger().records().to_vec(),
        }
    }
}

/// State shared by every daemon unit and request handler.
pub struct DaemonContext {
    config_path: PathBuf,
    settings: RwLock<Settings>,
    agent: Mutex<Agent>,
    view: RwLock<AgentView>,
    lock: OperationLock,
    scheduler: Mutex<Scheduler>,
    upstream: reqwest::Client,
}

impl DaemonContext {
    pub async fn new(config_path: &Path, settings: Settings) -> Result<Arc<Self>> {
        settings.ensure_dirs()?;
        let agent = build_agent(settings.clone()).await?;
        let upstream = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()?;
        Ok(Arc::new(Self {
            config_path: config_path.to_path_buf(),
            settings: RwLock::new(settings),
            view: RwLock::new(AgentView::of(&agent)),
            agent: Mutex::new(agent),
            lock: OperationLock::new(),
            scheduler: Mutex::new(Scheduler::new()),
            upstream,
        }))
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub fn agent(&self) -> &Mutex<Agent> {
        &self.agent
    }

    /// Publishes the agent's current ledger and handles to the HTTP side.
    pub async fn refresh_view(&self, agent: &Agent) {
        *self.view.write().await = AgentView::of(agent);
    }

    pub async fn control(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.view.read().await.control)
    }

    pub async fn log_buffer(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.view.read().await.logs)
    }

    /// Answers against the ledger as of the last completed operation.
    pub async fn application_update(&self, query: &AppUpdateQuery) -> Result<AppUpdate> {
        let settings = self.settings().await;
        let view = self.view.read().await;
        pca_core::find_application_update(&settings, &view.records, query)
    }

    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    pub fn upstream(&self) -> &reqwest::Client {
        &self.upstream
    }

    /// Releases the operation lock held by `holder` and picks up the ledger
    /// changes it made. Another holder's lock is left alone.
    pub async fn unlock(&self, holder: &str) {
        if !self.lock.release_held(holder) {
            debug!("{} does not hold the operation lock, nothing to release", holder);
            return;
        }
        let mut agent = self.agent.lock().await;
        if let Err(e) = agent.reload_ledger().await {
            warn!("Failed to reload ledger after unlock: {}", e);
        }
        self.refresh_view(&agent).await;
    }

    pub async fn start_units(self: &Arc<Self>) {
        let settings = self.settings().await;
        let mut scheduler = self.scheduler.lock().await;
        scheduler.start(units::http_listener(Arc::clone(self), settings.http_addr.clone()));
        scheduler.start(units::rpc_listener(Arc::clone(self), settings.rpc_addr.clone()));
        if settings.remote_commands_enabled {
            scheduler.start(units::remote_commands(
                Arc::clone(self),
                settings.commands_interval(),
            ));
        }
        scheduler.start(units::log_flush(Arc::clone(self)));
        info!("Started units: {}", scheduler.names().join(", "));
    }

    pub async fn stop_units(&self) {
        self.scheduler.lock().await.stop_all().await;
    }

    /// Stops every unit, reloads settings and ledger, then starts the units again.
    ///
    /// Units restart with the previous settings when the reload fails.
    pub async fn reconfigure(self: &Arc<Self>) -> Result<()> {
        info!("Reconfiguring daemon from {}", self.config_path.display());
        self.stop_units().await;
        let outcome = self.reload_settings().await;
        self.start_units().await;
        outcome
    }

    async fn reload_settings(&self) -> Result<()> {
        let settings = Settings::load_from(&self.config_path)?;
        settings.ensure_dirs()?;
        let agent = build_agent(settings.clone()).await?;
        let mut current = self.agent.lock().await;
        *current = agent;
        *self.settings.write().await = settings;
        self.refresh_view(&current).await;
        Ok(())
    }
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs the daemon in the foreground until interrupted.
pub async fn serve(config_path: &Path, settings: Settings) -> Result<()> {
    let ctx = DaemonContext::new(config_path, settings).await?;
    ctx.start_units().await;
    info!("pca daemon running");
    shutdown_signal().await;
    info!("Shutting down");
    ctx.stop_units().await;
    Ok(())
}
