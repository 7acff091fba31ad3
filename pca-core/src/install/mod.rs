// pca-core/src/install/mod.rs
//! Install orchestration: one backend per software kind, all-or-nothing per transaction.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pca_common::config::Settings;
use pca_common::error::{PcaError, Result};
use pca_common::model::{BuildStatus, InstallationResult, PackageManager, Software, SoftwareKind};
use pca_common::pipeline::PipelineEvent;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub mod app;
pub mod deb;

pub use app::AppBackend;
pub use deb::DebBackend;

/// Installs, describes and removes one software unit.
#[async_trait]
pub trait PackageBackend: Send + Sync {
    /// Identity used by `rollback`: destination path or system package name.
    fn name(&self) -> &str;

    fn set_name(&mut self, name: &str);

    /// Pure metadata extraction, nothing on the host changes.
    async fn parse_package(&mut self, source: &Path) -> Result<InstallationResult>;

    /// Installs from `source`. On failure the backend removes whatever it left behind.
    async fn install(&mut self, source: &Path) -> Result<()>;

    /// Undoes an install. Something that is already gone counts as success.
    async fn rollback(&mut self) -> Result<()>;
}

pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: &SoftwareKind) -> Result<Box<dyn PackageBackend>>;

    /// Extension of installable files for non-application kinds, if a manager is available.
    fn package_extension(&self) -> Option<&'static str>;
}

/// Backends for the host: `AppBackend` for applications, the detected OS package manager otherwise.
#[derive(Debug, Clone)]
pub struct SystemBackendFactory {
    manager: Option<PackageManager>,
    flags: String,
}

impl SystemBackendFactory {
    pub fn new(manager: Option<PackageManager>, flags: String) -> Self {
        Self { manager, flags }
    }

    pub fn detect(settings: &Settings) -> Self {
        let manager = crate::system::detect_package_manager();
        let flags = manager
            .map(|m| settings.pkg_flags_for(m))
            .unwrap_or_default();
        Self::new(manager, flags)
    }

    pub fn manager(&self) -> Option<PackageManager> {
        self.manager
    }
}

impl BackendFactory for SystemBackendFactory {
    fn create(&self, kind: &SoftwareKind) -> Result<Box<dyn PackageBackend>> {
        match kind {
            SoftwareKind::Application => Ok(Box::new(AppBackend::default())),
            SoftwareKind::Package(kind) => match self.manager {
                Some(PackageManager::Apt) => Ok(Box::new(DebBackend::new(&self.flags))),
                None => Err(PcaError::InstallerFailed(format!(
                    "no supported package manager found for kind '{kind}'"
                ))),
            },
        }
    }

    fn package_extension(&self) -> Option<&'static str> {
        self.manager.map(|m| m.extension())
    }
}

/// Backends that completed `install` during one package transaction.
pub struct Transaction<'a> {
    factory: &'a dyn BackendFactory,
    app_folder: PathBuf,
    completed: Vec<Box<dyn PackageBackend>>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl<'a> Transaction<'a> {
    pub fn new(
        factory: &'a dyn BackendFactory,
        app_folder: &Path,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            factory,
            app_folder: app_folder.to_path_buf(),
            completed: Vec::new(),
            event_tx,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.len()
    }

    /// Installs one unpacked software unit and records its installation result.
    #[instrument(skip_all, fields(software = %software.name, kind = %software.kind))]
    pub async fn install_software(&mut self, software: &mut Software) -> Result<()> {
        self.event_tx
            .send(PipelineEvent::InstallStarted {
                software: software.name.clone(),
                kind: software.kind.to_string(),
            })
            .ok();

        let unpacked = software
            .artifact()
            .filter(|a| a.status == BuildStatus::Unpacked)
            .and_then(|a| a.local_path.clone())
            .ok_or_else(|| {
                PcaError::InstallerFailed(format!("{} has no unpacked build", software.name))
            })?;

        let mut backend = self.factory.create(&software.kind)?;
        let source = match &software.kind {
            SoftwareKind::Application => {
                let key = software.external_key.as_deref().ok_or_else(|| {
                    PcaError::InstallerFailed(format!(
                        "application {} has no external key",
                        software.name
                    ))
                })?;
                let dest = self.app_folder.join(key);
                backend.set_name(&dest.to_string_lossy());
                unpacked
            }
            SoftwareKind::Package(_) => {
                let ext = self.factory.package_extension().ok_or_else(|| {
                    PcaError::InstallerFailed("no supported package manager".to_string())
                })?;
                pca_aio::find_file_with_suffix(&unpacked, ext).ok_or_else(|| {
                    PcaError::InstallerFailed(format!(
                        "no {ext} file in {}",
                        unpacked.display()
                    ))
                })?
            }
        };

        debug!("Installing {} from {}", software.name, source.display());
        let info = backend.parse_package(&source).await?;
        backend.install(&source).await?;
        software.package_info = Some(info);
        self.completed.push(backend);
        info!("Installed {} {}", software.name, software.display_version());
        self.event_tx
            .send(PipelineEvent::InstallFinished {
                software: software.name.clone(),
            })
            .ok();
        Ok(())
    }

    /// Rolls back every completed backend in the order they were added.
    /// Failures are logged and do not stop the remaining rollbacks.
    pub async fn rollback_all(&mut self) -> usize {
        let mut failed = 0;
        for mut backend in self.completed.drain(..) {
            let name = backend.name().to_string();
            let ok = match backend.rollback().await {
                Ok(()) => true,
                Err(e) => {
                    failed += 1;
                    error!("{}", PcaError::RollbackFailed(format!("{name}: {e}")));
                    false
                }
            };
            self.event_tx
                .send(PipelineEvent::RollbackFinished { software: name, ok })
                .ok();
        }
        failed
    }
}
