// pca-core/src/test_support.rs
//! In-memory control plane and backend doubles shared by the unit tests.
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pca_common::error::{PcaError, Result};
use pca_common::model::api::{
    LogEvent, Notification, NotificationKind, RegistrationRequest, RemoteCommand,
    SoftwareConfig,
};
use pca_common::model::{
    ArchiveType, ArtifactHead, Build, Client, InstallationResult, InstalledRecord, Package,
    PackageControlInfo, PackageItem, Product, Software, SoftwareKind, Unit,
};
use pca_net::{BuildSource, ControlPlane};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;

use crate::install::{BackendFactory, PackageBackend};

const CHUNK: usize = 256;

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o755);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Debug, Clone)]
pub(crate) struct FakeBuild {
    pub body: Vec<u8>,
    pub served: Vec<u8>,
    pub digest: String,
    pub archive: ArchiveType,
}

impl FakeBuild {
    pub fn new(body: Vec<u8>, archive: ArchiveType) -> Self {
        Self {
            digest: sha256_hex(&body),
            served: body.clone(),
            body,
            archive,
        }
    }

    pub fn zip(entries: &[(&str, &[u8])]) -> Self {
        Self::new(zip_bytes(entries), ArchiveType::Zip)
    }

    /// Serves different bytes than the announced digest describes.
    pub fn tampered(mut self) -> Self {
        if let Some(first) = self.served.first_mut() {
            *first ^= 0xff;
        }
        self
    }

    pub fn truncated(mut self, len: usize) -> Self {
        self.served.truncate(len);
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeControlPlane {
    builds: Mutex<HashMap<i64, FakeBuild>>,
    notifications: Mutex<Vec<Notification>>,
    configs: Mutex<HashMap<i64, SoftwareConfig>>,
    updates: Mutex<HashMap<i64, Vec<Package>>>,
    patches: Mutex<HashMap<i64, Software>>,
    logs: Mutex<Vec<LogEvent>>,
    fail_logs: AtomicBool,
    registrations: Mutex<Vec<RegistrationRequest>>,
    commands: Mutex<VecDeque<RemoteCommand>>,
    agent_release: Mutex<Option<Software>>,
}

impl FakeControlPlane {
    pub fn add_build(&self, build_id: i64, build: FakeBuild) {
        self.builds.lock().unwrap().insert(build_id, build);
    }

    pub fn add_config(&self, software_id: i64, config: SoftwareConfig) {
        self.configs.lock().unwrap().insert(software_id, config);
    }

    pub fn add_update(&self, unit_id: i64, package: Package) {
        self.updates
            .lock()
            .unwrap()
            .entry(unit_id)
            .or_default()
            .push(package);
    }

    pub fn set_patch(&self, software_id: i64, software: Software) {
        self.patches.lock().unwrap().insert(software_id, software);
    }

    pub fn set_agent_release(&self, software: Software) {
        *self.agent_release.lock().unwrap() = Some(software);
    }

    pub fn push_command(&self, command: RemoteCommand) {
        self.commands.lock().unwrap().push_back(command);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn notification_kinds(&self) -> Vec<NotificationKind> {
        self.notifications().iter().map(|n| n.kind).collect()
    }

    pub fn posted_logs(&self) -> Vec<LogEvent> {
        self.logs.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildSource for FakeControlPlane {
    async fn build_head(&self, build_id: i64) -> Result<ArtifactHead> {
        let builds = self.builds.lock().unwrap();
        let build = builds
            .get(&build_id)
            .ok_or_else(|| PcaError::NotFound(format!("build {build_id}")))?;
        Ok(ArtifactHead {
            size: build.body.len() as u64,
            hash_algorithm: "sha256".to_string(),
            hash_value: build.digest.clone(),
            archive_type: build.archive.clone(),
        })
    }

    async fn download_build(
        &self,
        build_id: i64,
        dest: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        let served = self
            .builds
            .lock()
            .unwrap()
            .get(&build_id)
            .map(|b| b.served.clone())
            .ok_or_else(|| PcaError::NotFound(format!("build {build_id}")))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(dest)?;
        let mut loaded = 0u64;
        for chunk in served.chunks(CHUNK) {
            file.write_all(chunk)?;
            loaded += chunk.len() as u64;
            progress(loaded);
        }
        Ok(loaded)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn register(&self, request: &RegistrationRequest) -> Result<()> {
        self.registrations.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn clients(&self) -> Result<Vec<Client>> {
        Ok(Vec::new())
    }

    async fn products(&self, _client_id: i64) -> Result<Vec<Product>> {
        Ok(Vec::new())
    }

    async fn units(&self, _product_id: i64) -> Result<Vec<Unit>> {
        Ok(Vec::new())
    }

    async fn unit_updates(&self, unit_id: i64) -> Result<Vec<Package>> {
        Ok(self
            .updates
            .lock()
            .unwrap()
            .get(&unit_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_patch(&self, software_id: i64) -> Result<Option<Software>> {
        Ok(self.patches.lock().unwrap().get(&software_id).cloned())
    }

    async fn software_config(&self, software_id: i64) -> Result<Option<SoftwareConfig>> {
        Ok(self.configs.lock().unwrap().get(&software_id).cloned())
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn next_command(&self) -> Result<Option<RemoteCommand>> {
        Ok(self.commands.lock().unwrap().pop_front())
    }

    async fn post_logs(&self, events: &[LogEvent]) -> Result<()> {
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(PcaError::Api("log sink unavailable".to_string()));
        }
        self.logs.lock().unwrap().extend_from_slice(events);
        Ok(())
    }

    async fn self_update(&self) -> Result<Option<Software>> {
        Ok(self.agent_release.lock().unwrap().clone())
    }
}

/// Records `install:<name>` and `rollback:<name>` calls, failing installs whose
/// name contains `fail_on`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackendFactory {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<String>,
    pub fail_rollback: bool,
}

impl FakeBackendFactory {
    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl BackendFactory for FakeBackendFactory {
    fn create(&self, kind: &SoftwareKind) -> Result<Box<dyn PackageBackend>> {
        Ok(Box::new(FakeBackend {
            kind: kind.clone(),
            name: String::new(),
            factory: self.clone(),
        }))
    }

    fn package_extension(&self) -> Option<&'static str> {
        Some(".deb")
    }
}

struct FakeBackend {
    kind: SoftwareKind,
    name: String,
    factory: FakeBackendFactory,
}

#[async_trait]
impl PackageBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    async fn parse_package(&mut self, source: &Path) -> Result<InstallationResult> {
        match self.kind {
            SoftwareKind::Application => Ok(InstallationResult::Application {
                path: self.name.clone().into(),
            }),
            SoftwareKind::Package(_) => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.name = stem.clone();
                Ok(InstallationResult::System {
                    control: PackageControlInfo {
                        name: stem,
                        version: "1.0.0".to_string(),
                        ..PackageControlInfo::default()
                    },
                    service: None,
                    autorun: None,
                })
            }
        }
    }

    async fn install(&mut self, _source: &Path) -> Result<()> {
        self.factory
            .calls
            .lock()
            .unwrap()
            .push(format!("install:{}", self.name));
        match &self.factory.fail_on {
            Some(needle) if self.name.contains(needle.as_str()) => Err(
                PcaError::InstallerFailed(format!("{} refused to install", self.name)),
            ),
            _ => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        self.factory
            .calls
            .lock()
            .unwrap()
            .push(format!("rollback:{}", self.name));
        if self.factory.fail_rollback {
            return Err(PcaError::RollbackFailed(self.name.clone()));
        }
        Ok(())
    }
}

/// Software with branch `main`, version `1.0.0`, patch 0. Applications use
/// `name` as their external key.
pub(crate) fn software(id: i64, name: &str, kind: &str, build_id: i64) -> Software {
    let kind = SoftwareKind::from(kind.to_string());
    Software {
        id,
        name: name.to_string(),
        external_key: (kind == SoftwareKind::Application).then(|| name.to_string()),
        kind,
        branch: "main".to_string(),
        version: "1.0.0".to_string(),
        patch: 0,
        build: Build {
            id: build_id,
            name: format!("b{build_id}"),
            hashsum: String::new(),
            artifact: None,
        },
        package_info: None,
        description: String::new(),
        changelog: None,
    }
}

pub(crate) fn package(id: i64, name: &str, items: Vec<(i64, Software)>) -> Package {
    Package {
        id,
        name: name.to_string(),
        description: String::new(),
        items: items
            .into_iter()
            .map(|(install_order, software)| PackageItem {
                install_order,
                package_id: id,
                software,
                enable: true,
            })
            .collect(),
        inner_index: 0,
        prev_package_id: None,
    }
}

pub(crate) fn record(package: Package) -> InstalledRecord {
    InstalledRecord {
        client: Client {
            id: 1,
            name: "acme".to_string(),
            description: String::new(),
        },
        product: Product {
            id: 2,
            name: "edge".to_string(),
            description: String::new(),
        },
        unit: Unit {
            id: 3,
            product_id: 2,
            status: "active".to_string(),
            packages: Vec::new(),
        },
        package,
    }
}
