// pca-core/src/agent.rs
//! Agent operations: install, update, patch, remove, configure, register and
//! self update. Interactive confirmation stays with the caller; every mutating
//! operation here assumes the operation lock is already held.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pca_common::config::Settings;
use pca_common::error::{PcaError, Result};
use pca_common::model::api::{
    LogEvent, Notification, NotificationKind, RegistrationRequest, RemoteCommand,
};
use pca_common::model::{
    BuildArtifact, BuildStatus, InstallationResult, InstalledRecord, Package, Software,
    SoftwareKind,
};
use pca_common::pipeline::PipelineEvent;
use pca_net::ControlPlane;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::acquire::Acquisition;
use crate::install::{BackendFactory, Transaction};
use crate::ledger::Ledger;
use crate::logbuf::LogBuffer;
use crate::system;

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const EXECUTABLE_NAME: &str = "pca";
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Query of the `/app/check` and `/app/fetch` routes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppUpdateQuery {
    pub ext_key: String,
    pub file_name: String,
    pub version: String,
    #[serde(default)]
    pub patch: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppUpdate {
    Available(PathBuf),
    UpToDate,
    UnknownKey,
    MissingFile,
}

/// Parses `1`, `1.2` and `1.2.3` style versions, padding missing components.
pub fn parse_lenient_version(raw: &str) -> Result<semver::Version> {
    let raw = raw.trim().trim_start_matches('v');
    let split_at = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, rest) = raw.split_at(split_at);
    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    Ok(semver::Version::parse(&format!("{}{}", parts.join("."), rest))?)
}

/// Finds the application whose external key contains `query.ext_key` and
/// reports whether its installed build is newer than the caller's.
pub fn find_application_update(
    settings: &Settings,
    records: &[InstalledRecord],
    query: &AppUpdateQuery,
) -> Result<AppUpdate> {
    let requested = parse_lenient_version(&query.version)?;
    let found = records
        .iter()
        .flat_map(|r| r.package.items.iter())
        .filter_map(|item| {
            let key = item.software.external_key.as_deref()?;
            key.contains(&query.ext_key).then_some((key, &item.software))
        })
        .last();
    let Some((key, software)) = found else {
        return Ok(AppUpdate::UnknownKey);
    };

    let installed = match parse_lenient_version(&software.version) {
        Ok(v) => v,
        Err(e) => {
            warn!("Installed version '{}' unparsable: {}", software.version, e);
            return Ok(AppUpdate::UpToDate);
        }
    };
    let newer = installed > requested || (installed == requested && software.patch > query.patch);
    if !newer {
        return Ok(AppUpdate::UpToDate);
    }
    match pca_aio::find_file_named(&settings.app_path(key), &query.file_name) {
        Some(path) => Ok(AppUpdate::Available(path)),
        None => Ok(AppUpdate::MissingFile),
    }
}

pub struct Agent {
    settings: Settings,
    control: Arc<dyn ControlPlane>,
    backends: Arc<dyn BackendFactory>,
    ledger: Ledger,
    logs: Arc<LogBuffer>,
    event_tx: broadcast::Sender<PipelineEvent>,
    trigger_cmd_id: Option<i64>,
}

impl Agent {
    pub async fn new(
        settings: Settings,
        control: Arc<dyn ControlPlane>,
        backends: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        let ledger = Ledger::load(&settings.info_dir).await?;
        let logs = Arc::new(LogBuffer::new(
            &settings.log_buffer_path(),
            settings.log_buffer_limit,
        ));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            settings,
            control,
            backends,
            ledger,
            logs,
            event_tx,
            trigger_cmd_id: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn control(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.control)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn log_buffer(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.logs)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Remote command that triggered the current operation, attached to notifications.
    pub fn set_trigger_command(&mut self, cmd_id: Option<i64>) {
        self.trigger_cmd_id = cmd_id;
    }

    pub async fn reload(&mut self, settings: Settings) -> Result<()> {
        self.logs = Arc::new(LogBuffer::new(
            &settings.log_buffer_path(),
            settings.log_buffer_limit,
        ));
        self.ledger = Ledger::load(&settings.info_dir).await?;
        self.settings = settings;
        Ok(())
    }

    pub async fn reload_ledger(&mut self) -> Result<()> {
        self.ledger.reload().await
    }

    fn notification(
        &self,
        kind: NotificationKind,
        package_id: i64,
        unit_id: i64,
        context: Option<Map<String, Value>>,
    ) -> Notification {
        Notification {
            package_id,
            unit_id,
            kind,
            context,
            trigger_cmd_id: self.trigger_cmd_id,
        }
    }

    /// Best-effort: delivery failures are only logged.
    async fn notify(
        &self,
        kind: NotificationKind,
        record: &InstalledRecord,
        context: Option<Map<String, Value>>,
    ) {
        let note = self.notification(kind, record.package.id, record.unit.id, context);
        if let Err(e) = self.control.notify(&note).await {
            warn!("Failed to send '{}' notification: {}", kind, e);
        }
    }

    async fn notify_failure(&self, record: &InstalledRecord, err: &PcaError) {
        let mut context = Map::new();
        context.insert("error".to_string(), Value::String(err.to_string()));
        self.notify(NotificationKind::Fails, record, Some(context))
            .await;
    }

    #[instrument(skip_all)]
    pub async fn register(&self) -> Result<()> {
        let pkg_system = system::detect_package_manager()
            .map(|m| m.system_name().to_string())
            .unwrap_or_default();
        let request = RegistrationRequest {
            agent_secret: self.settings.secret.clone(),
            local_address: system::local_ip().to_string(),
            system: system::os_version(),
            pkg_system,
            proxy_info: None,
            version: AGENT_VERSION.to_string(),
            local_time_offset: system::local_time_offset(),
        };
        debug!("Registering agent from {}", request.local_address);
        self.control.register(&request).await?;
        info!("Agent registration complete");
        Ok(())
    }

    /// Installs a freshly selected package and commits its record.
    #[instrument(skip_all, fields(package = %record.package.name))]
    pub async fn install_package(&mut self, record: InstalledRecord) -> Result<()> {
        self.ledger.stage(record.clone());
        let mut record = record;
        if let Err(e) = self.run_transaction(&mut record, None).await {
            self.ledger.discard_pending();
            return Err(e);
        }
        self.ledger.stage(record);
        self.ledger.commit().await
    }

    /// Newer package for the unit that declares `record` as its predecessor.
    pub async fn find_update(&self, record: &InstalledRecord) -> Result<Option<Package>> {
        debug!("Checking packages for {}", record.package.name);
        let updates = self.control.unit_updates(record.unit.id).await?;
        Ok(updates.into_iter().find(|pkg| {
            pkg.prev_package_id == Some(record.package.id) && pkg.all_enabled()
        }))
    }

    #[instrument(skip_all, fields(package_id = package_id, update = %update.name))]
    pub async fn apply_update(&mut self, package_id: i64, update: Package) -> Result<()> {
        let mut record = self
            .ledger
            .get(package_id)
            .cloned()
            .ok_or_else(|| PcaError::NotFound(format!("installed package {package_id}")))?;
        let index = record.package.inner_index;
        record.package = update;
        record.package.inner_index = index;
        self.run_transaction(&mut record, None).await?;
        self.ledger.replace(package_id, record).await
    }

    /// Latest patch of an installed software when it is newer than what is installed.
    pub async fn find_patch(&self, installed: &Software) -> Result<Option<Software>> {
        match self.control.latest_patch(installed.id).await? {
            None => {
                info!("Remote software {} not found", installed.id);
                Ok(None)
            }
            Some(latest) if latest.patch <= installed.patch => {
                info!("Software {} already has latest patch", installed.name);
                Ok(None)
            }
            Some(latest) => Ok(Some(latest)),
        }
    }

    /// Swaps one software of an installed package for its patch and runs the
    /// single-item pipeline for it.
    #[instrument(skip_all, fields(package_id = package_id, software_id = software_id))]
    pub async fn patch_software(
        &mut self,
        package_id: i64,
        software_id: i64,
        patched: Software,
    ) -> Result<()> {
        let mut record = self
            .ledger
            .get(package_id)
            .cloned()
            .ok_or_else(|| PcaError::NotFound(format!("installed package {package_id}")))?;
        let patched_id = patched.id;
        let item = record.package.find_software_mut(software_id).ok_or_else(|| {
            PcaError::NotFound(format!("software {software_id} in package {package_id}"))
        })?;
        item.software = patched;
        self.run_transaction(&mut record, Some(patched_id)).await?;
        self.ledger.replace(package_id, record).await
    }

    /// Rolls back every installed item of a package and forgets its record.
    /// Returns false when the package is not in the ledger.
    #[instrument(skip_all, fields(package_id = package_id))]
    pub async fn remove_package(&mut self, package_id: i64) -> Result<bool> {
        let Some(record) = self.ledger.get(package_id).cloned() else {
            warn!("Package with id {} not found, skip", package_id);
            return Ok(false);
        };
        info!("Removing package {}", record.package.name);

        let mut failures = Vec::new();
        for item in &record.package.items {
            let software = &item.software;
            if software.artifact().map(|a| &a.status) != Some(&BuildStatus::Installed) {
                info!("Software {} was not installed, skip", software.name);
                continue;
            }
            let name = match (&software.kind, software.package_info.as_ref()) {
                (SoftwareKind::Application, Some(InstallationResult::Application { path })) => {
                    path.to_string_lossy().into_owned()
                }
                (SoftwareKind::Application, _) => match software.external_key.as_deref() {
                    Some(key) => self.settings.app_path(key).to_string_lossy().into_owned(),
                    None => {
                        warn!("Application {} has no external key, skip", software.name);
                        continue;
                    }
                },
                (SoftwareKind::Package(_), _) => match software.sys_package_name() {
                    Some(name) => name.to_string(),
                    None => {
                        warn!("Software {} has no system package name, skip", software.name);
                        continue;
                    }
                },
            };
            let mut backend = self.backends.create(&software.kind)?;
            backend.set_name(&name);
            if let Err(e) = backend.rollback().await {
                error!("{}", PcaError::RollbackFailed(format!("{name}: {e}")));
                failures.push(e);
            }
        }

        if let Some(first) = failures.into_iter().next() {
            let err = PcaError::RollbackFailed(format!(
                "can't remove software in package {}: {}",
                record.package.name, first
            ));
            self.notify_failure(&record, &err).await;
            return Err(err);
        }
        self.ledger.remove(package_id).await?;
        self.notify(NotificationKind::Removed, &record, None).await;
        info!("Removed package {}", record.package.name);
        Ok(true)
    }

    /// Re-fetches and applies the remote config of an installed software.
    pub async fn configure_software(&self, software_id: i64) -> Result<bool> {
        let info = self
            .ledger
            .records()
            .iter()
            .flat_map(|r| r.package.items.iter())
            .find(|item| item.software.id == software_id)
            .map(|item| item.software.package_info.clone())
            .ok_or_else(|| PcaError::NotFound(format!("installed software {software_id}")))?;
        self.apply_config(software_id, info.as_ref()).await
    }

    async fn apply_config(
        &self,
        software_id: i64,
        info: Option<&InstallationResult>,
    ) -> Result<bool> {
        let Some(config) = self.control.software_config(software_id).await? else {
            info!("Config for software {} not found", software_id);
            return Ok(false);
        };
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, config.raw_data.as_bytes()).await?;
        info!("Wrote software config file {}", path.display());
        if let Some(info) = info {
            system::restart_installation(info).await;
        }
        Ok(true)
    }

    /// Acquires and installs the selected items of `record`, all or nothing.
    async fn run_transaction(
        &mut self,
        record: &mut InstalledRecord,
        only: Option<i64>,
    ) -> Result<()> {
        record.package.sort_items();
        let targets: Vec<usize> = record
            .package
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| only.map_or(true, |id| item.software.id == id))
            .map(|(idx, _)| idx)
            .collect();
        if targets.is_empty() {
            return Err(PcaError::NotFound(format!(
                "nothing to install in package {}",
                record.package.name
            )));
        }

        let acquisition = Acquisition::new(
            Arc::clone(&self.control),
            &self.settings.tmp_dir,
            self.event_tx.clone(),
        );
        let outcome = self.transact(&acquisition, record, &targets).await;
        let artifacts: Vec<BuildArtifact> = targets
            .iter()
            .filter_map(|&i| record.package.items[i].software.artifact().cloned())
            .collect();
        acquisition.cleanup(&artifacts).await;
        outcome
    }

    async fn transact(
        &mut self,
        acquisition: &Acquisition,
        record: &mut InstalledRecord,
        targets: &[usize],
    ) -> Result<()> {
        self.notify(NotificationKind::Download, record, None).await;

        for &i in targets {
            let software = &mut record.package.items[i].software;
            if let Some(artifact) = software.artifact_mut() {
                artifact.reset();
            }
            if let Err(e) = acquisition.fetch_head(software).await {
                return Err(self.abort(record, e).await);
            }
        }

        let mut artifacts: Vec<BuildArtifact> = targets
            .iter()
            .filter_map(|&i| record.package.items[i].software.artifact().cloned())
            .collect();
        let acquired = acquisition.run(&mut artifacts).await;
        for (&i, artifact) in targets.iter().zip(artifacts) {
            record.package.items[i].software.build.artifact = Some(artifact);
        }
        if let Err(e) = acquired {
            return Err(self.abort(record, e).await);
        }

        let backends = Arc::clone(&self.backends);
        let mut tx = Transaction::new(
            backends.as_ref(),
            &self.settings.app_folder,
            self.event_tx.clone(),
        );
        for &i in targets {
            let software = &mut record.package.items[i].software;
            if let Err(e) = tx.install_software(software).await {
                if let Some(artifact) = software.artifact_mut() {
                    artifact.fail(e.to_string());
                }
                self.event_tx
                    .send(PipelineEvent::install_failed(software.name.clone(), &e))
                    .ok();
                let err = self.abort(record, e).await;
                let failed = tx.rollback_all().await;
                if failed > 0 {
                    warn!("{} rollback(s) failed", failed);
                }
                return Err(err);
            }
        }

        for &i in targets {
            let software = &mut record.package.items[i].software;
            if let Some(artifact) = software.artifact_mut() {
                artifact.mark_installed()?;
            }
            if !software.is_application() {
                if let Err(e) = self
                    .apply_config(software.id, software.package_info.as_ref())
                    .await
                {
                    warn!("Failed to configure {}: {}", software.name, e);
                }
            }
        }
        self.notify(NotificationKind::Installed, record, None).await;
        info!("Package {} installed", record.package.name);
        Ok(())
    }

    /// Failure path of a transaction: report, persist the ledger as it was before.
    async fn abort(&mut self, record: &InstalledRecord, err: PcaError) -> PcaError {
        error!("Failed to install package {}: {}", record.package.name, err);
        self.notify_failure(record, &err).await;
        self.ledger.discard_pending();
        self.ledger.persist().await;
        err
    }

    /// Agent software announced by the control plane when it is newer than this binary.
    pub async fn find_self_update(&self) -> Result<Option<Software>> {
        let Some(candidate) = self.control.self_update().await? else {
            return Ok(None);
        };
        let current = parse_lenient_version(AGENT_VERSION)?;
        let offered = parse_lenient_version(&candidate.version)?;
        if offered > current {
            Ok(Some(candidate))
        } else {
            info!("Agent {} is up to date", AGENT_VERSION);
            Ok(None)
        }
    }

    /// Downloads the agent build and replaces `target` with the `pca` executable it contains.
    #[instrument(skip_all, fields(version = %software.version))]
    pub async fn apply_self_update(&self, mut software: Software, target: &Path) -> Result<()> {
        let acquisition = Acquisition::new(
            Arc::clone(&self.control),
            &self.settings.tmp_dir,
            self.event_tx.clone(),
        );
        acquisition.fetch_head(&mut software).await?;
        let mut artifacts: Vec<BuildArtifact> = software.artifact().cloned().into_iter().collect();
        let outcome = self.replace_self(&acquisition, &mut artifacts, target).await;
        acquisition.cleanup(&artifacts).await;
        outcome?;

        let mut context = Map::new();
        context.insert("version".to_string(), Value::String(software.version.clone()));
        let note = self.notification(NotificationKind::Upgraded, 0, 0, Some(context));
        if let Err(e) = self.control.notify(&note).await {
            warn!("Failed to send 'upgraded' notification: {}", e);
        }
        info!("Agent updated to {}", software.version);
        Ok(())
    }

    async fn replace_self(
        &self,
        acquisition: &Acquisition,
        artifacts: &mut [BuildArtifact],
        target: &Path,
    ) -> Result<()> {
        acquisition.run(artifacts).await?;
        let unpacked = artifacts
            .first()
            .and_then(|a| a.local_path.clone())
            .ok_or_else(|| PcaError::InstallerFailed("agent build not unpacked".to_string()))?;
        let binary = pca_aio::find_file_named(&unpacked, EXECUTABLE_NAME).ok_or_else(|| {
            PcaError::InstallerFailed(format!(
                "no {EXECUTABLE_NAME} executable in {}",
                unpacked.display()
            ))
        })?;
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || pca_aio::replace_executable(&binary, &target))
            .await
            .map_err(|e| PcaError::Generic(format!("self update task failed: {e}")))?
    }

    /// Looks up an installed application for the app update routes.
    pub fn application_update(&self, query: &AppUpdateQuery) -> Result<AppUpdate> {
        find_application_update(&self.settings, self.ledger.records(), query)
    }

    /// Forwards events upstream, buffering them locally when that fails.
    pub async fn forward_logs(&self, events: Vec<LogEvent>) -> Result<()> {
        if let Err(e) = self.control.post_logs(&events).await {
            debug!("Buffering {} log event(s): {}", events.len(), e);
            self.logs.push(events).await?;
        }
        Ok(())
    }

    pub async fn flush_logs(&self) -> Result<usize> {
        self.logs.flush(self.control.as_ref()).await
    }

    pub async fn next_remote_command(&self) -> Result<Option<RemoteCommand>> {
        self.control.next_command().await
    }
}

#[cfg(test)]
mod tests;
