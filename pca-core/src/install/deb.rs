// pca-core/src/install/deb.rs
use std::path::Path;

use async_trait::async_trait;
use pca_common::error::{PcaError, Result};
use pca_common::model::{InstallationResult, PackageControlInfo, ServiceInfo};
use tracing::{debug, error, info, warn};

use super::PackageBackend;

const APT_GET: &str = "apt-get";
const DPKG_DEB: &str = "dpkg-deb";

/// Installs `.deb` files through apt and purges them on rollback.
#[derive(Debug, Clone)]
pub struct DebBackend {
    flags: Vec<String>,
    name: String,
}

impl DebBackend {
    pub fn new(flags: &str) -> Self {
        Self {
            flags: flags.split_whitespace().map(str::to_string).collect(),
            name: String::new(),
        }
    }

    async fn dpkg_deb(&self, flag: &str, file: &Path) -> Result<String> {
        let args = vec![flag.to_string(), file.to_string_lossy().into_owned()];
        let output = pca_aio::run_command_async(DPKG_DEB, &args, &[]).await?;
        if !output.status.success() {
            return Err(PcaError::InstallerFailed(format!(
                "{DPKG_DEB} {flag} {} failed: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn purge(&self) -> Result<()> {
        let mut args = vec!["purge".to_string()];
        args.extend(self.flags.iter().cloned());
        args.push(self.name.clone());
        info!("Execute {} {}", APT_GET, args.join(" "));
        let output = pca_aio::run_command_async(
            APT_GET,
            &args,
            &[("DEBIAN_FRONTEND", "noninteractive")],
        )
        .await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if purge_target_missing(&stderr) {
            warn!("Rollback({}) skipped: {}", self.name, stderr.trim());
            return Ok(());
        }
        if !output.status.success() || !stderr.trim().is_empty() {
            error!("Rollback({}) failed: {}", self.name, stderr.trim());
            return Err(PcaError::RollbackFailed(format!(
                "{}: {}",
                self.name,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Reads `dpkg-deb -f` output.
pub fn parse_control_fields(raw: &str) -> PackageControlInfo {
    let mut control = PackageControlInfo::default();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Package" => control.name = value.to_string(),
            "Version" => control.version = value.to_string(),
            "Maintainer" => control.maintainer = value.to_string(),
            "Description" => control.description = value.to_string(),
            "Depends" => {
                control.depends = value
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            }
            _ => {}
        }
    }
    control
}

/// Finds a systemd unit in `dpkg-deb -c` output.
pub fn find_service_unit(listing: &str) -> Option<ServiceInfo> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .filter(|path| path.ends_with(".service"))
        .filter_map(|path| Path::new(path).file_name())
        .map(|name| ServiceInfo {
            name: name.to_string_lossy().into_owned(),
        })
        .last()
}

/// apt reports debconf frontend trouble on stderr even when the install went through.
fn install_stderr_is_benign(stderr: &str) -> bool {
    stderr.contains("debconf")
}

fn purge_target_missing(stderr: &str) -> bool {
    stderr.contains("isn't installed") || stderr.contains("Unable to locate")
}

#[async_trait]
impl PackageBackend for DebBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    async fn parse_package(&mut self, source: &Path) -> Result<InstallationResult> {
        if source.extension().is_none_or(|ext| ext != "deb") {
            return Err(PcaError::InstallerFailed(format!(
                "{} is not a deb package",
                source.display()
            )));
        }
        let control = parse_control_fields(&self.dpkg_deb("-f", source).await?);
        if control.name.is_empty() {
            return Err(PcaError::InstallerFailed(format!(
                "{} has no Package field",
                source.display()
            )));
        }
        let service = match self.dpkg_deb("-c", source).await {
            Ok(listing) => find_service_unit(&listing),
            Err(e) => {
                warn!("Could not list {}: {}", source.display(), e);
                None
            }
        };
        debug!("Parsed {} {} (service: {:?})", control.name, control.version, service);
        self.name = control.name.clone();
        Ok(InstallationResult::System {
            control,
            service,
            autorun: None,
        })
    }

    async fn install(&mut self, source: &Path) -> Result<()> {
        let mut args = vec!["install".to_string()];
        args.extend(self.flags.iter().cloned());
        args.push(source.to_string_lossy().into_owned());
        info!("Execute {} {}", APT_GET, args.join(" "));
        let output = pca_aio::run_command_async(APT_GET, &args, &[]).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if install_stderr_is_benign(&stderr) {
            debug!("debconf warning during install: {}", stderr.trim());
            return Ok(());
        }
        if output.status.success() && stderr.trim().is_empty() {
            return Ok(());
        }
        error!("Install({}) failed: {}", source.display(), stderr.trim());
        if !self.name.is_empty() {
            if let Err(e) = self.purge().await {
                warn!("Cleanup after failed install of {} failed: {}", self.name, e);
            }
        }
        Err(PcaError::InstallerFailed(format!(
            "{}: {}",
            source.display(),
            stderr.trim()
        )))
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Ok(());
        }
        self.purge().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_fields_are_read() {
        let raw = "Package: agent-tools\nVersion: 2.1.0\nMaintainer: Ops <ops@example.com>\n\
                   Depends: libc6 (>= 2.31), curl\nDescription: Tools\n";
        let control = parse_control_fields(raw);
        assert_eq!(control.name, "agent-tools");
        assert_eq!(control.version, "2.1.0");
        assert_eq!(control.maintainer, "Ops <ops@example.com>");
        assert_eq!(control.depends, vec!["libc6 (>= 2.31)", "curl"]);
    }

    #[test]
    fn service_unit_is_found_in_listing() {
        let listing = "drwxr-xr-x root/root 0 2024-01-01 00:00 ./usr/\n\
                       -rw-r--r-- root/root 312 2024-01-01 00:00 ./lib/systemd/system/agent-tools.service\n";
        assert_eq!(
            find_service_unit(listing),
            Some(ServiceInfo {
                name: "agent-tools.service".into()
            })
        );
        assert_eq!(find_service_unit("-rw-r--r-- root/root 1 x ./usr/bin/tool\n"), None);
    }

    #[test]
    fn stderr_classification() {
        assert!(install_stderr_is_benign(
            "debconf: unable to initialize frontend: Dialog"
        ));
        assert!(purge_target_missing("Package 'x' is not installed, so not removed\nE: Unable to locate package x"));
        assert!(!purge_target_missing("E: dpkg was interrupted"));
    }

    #[tokio::test]
    async fn non_deb_source_is_rejected_before_running_anything() {
        let mut backend = DebBackend::new("-y");
        let err = backend
            .parse_package(Path::new("/tmp/tool.rpm"))
            .await
            .unwrap_err();
        assert!(matches!(err, PcaError::InstallerFailed(_)));
    }

    #[tokio::test]
    async fn rollback_without_name_is_a_no_op() {
        let mut backend = DebBackend::new("-y");
        backend.rollback().await.unwrap();
    }
}
