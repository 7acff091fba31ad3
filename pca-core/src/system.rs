// pca-core/src/system.rs
//! Host facts and init-system helpers.
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;

use chrono::Local;
use pca_common::error::{PcaError, Result};
use pca_common::model::{InstallationResult, PackageManager};
use tracing::{debug, warn};

const OS_RELEASE: &str = "/etc/os-release";

/// First supported package manager found on `PATH`.
pub fn detect_package_manager() -> Option<PackageManager> {
    PackageManager::ALL.iter().copied().find(|m| {
        let found = which::which(m.as_str()).is_ok();
        debug!("Package manager {} on PATH: {}", m.as_str(), found);
        found
    })
}

/// Address of the interface that routes outward. No packet is sent.
pub fn local_ip() -> IpAddr {
    let routed = UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip());
    match routed {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }
}

/// `<name>:<major version>` from an os-release document, lowercased.
pub fn parse_os_release(raw: &str) -> String {
    let field = |key: &str| {
        raw.lines()
            .filter_map(|line| line.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .unwrap_or_default()
    };
    let name = field("NAME").to_lowercase();
    let version = field("VERSION_ID");
    let major = version.split('.').next().unwrap_or_default().to_lowercase();
    format!("{name}:{major}")
}

pub fn os_version() -> String {
    os_version_from(Path::new(OS_RELEASE))
}

pub fn os_version_from(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse_os_release(&raw),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            format!("{}:", std::env::consts::OS)
        }
    }
}

/// Local offset from UTC in seconds.
pub fn local_time_offset() -> i32 {
    Local::now().offset().local_minus_utc()
}

async fn systemctl(action: &str, unit: &str) -> Result<()> {
    let output =
        pca_aio::run_command_async("systemctl", &[action.to_string(), unit.to_string()], &[])
            .await?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(PcaError::CommandExecError(format!(
        "systemctl {action} {unit}: {}",
        stderr.trim()
    )))
}

/// Stop then start. A unit that is already stopped is fine.
pub async fn restart_service(unit: &str) -> Result<()> {
    if let Err(e) = systemctl("stop", unit).await {
        debug!("Stopping {} failed: {}", unit, e);
        if !e.to_string().contains("already") && !e.to_string().contains("not loaded") {
            return Err(e);
        }
    }
    systemctl("start", unit).await?;
    debug!("Restarted service {}", unit);
    Ok(())
}

/// Restarts whatever the installation registered with the host. Best-effort.
pub async fn restart_installation(info: &InstallationResult) {
    let InstallationResult::System {
        service, autorun, ..
    } = info
    else {
        return;
    };
    if let Some(service) = service {
        if let Err(e) = restart_service(service.unit_name()).await {
            warn!("Failed to restart service {}: {}", service.name, e);
        }
    }
    if let Some(autorun) = autorun {
        debug!(
            "Autorun entry {} is picked up on next session start",
            autorun.path.display()
        );
    }
}
