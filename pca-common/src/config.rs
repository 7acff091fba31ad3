// pca-common/src/config.rs
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PcaError, Result};
use crate::model::PackageManager;

// Fallback when PCA_HOME is not set or is empty.
const DEFAULT_PCA_HOME: &str = "/opt/abt/pca";
const CONFIG_FILENAME: &str = "config.json";
pub const LOG_BUFFER_FILENAME: &str = "soft.log.json";

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:38844";
pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:38845";
const DEFAULT_COMMANDS_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOG_BUFFER_LIMIT: usize = 1000;
const DEFAULT_CONTROL_HOST: &str = "release.a-7.tech";

/// Root directory of the agent installation.
pub fn pca_home() -> PathBuf {
    env::var("PCA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PCA_HOME))
}

pub fn default_config_path() -> PathBuf {
    pca_home().join(CONFIG_FILENAME)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetSettings {
    pub protocol: String,
    pub control_host: String,
    pub control_port: Option<u16>,
    /// This agent talks to the control plane through another agent's proxy route.
    pub as_proxy: bool,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            control_host: DEFAULT_CONTROL_HOST.to_string(),
            control_port: None,
            as_proxy: false,
        }
    }
}

impl NetSettings {
    pub fn base_url(&self) -> String {
        match self.control_port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.control_host, port),
            None => format!("{}://{}", self.protocol, self.control_host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug: bool,
    pub secret: String,
    pub http_addr: String,
    pub rpc_addr: String,
    pub info_dir: PathBuf,
    pub system_dir: PathBuf,
    pub app_folder: PathBuf,
    pub tmp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pkg_flags: HashMap<String, String>,
    pub net_info: NetSettings,
    pub remote_commands_enabled: bool,
    pub commands_timeout: u64,
    pub log_buffer_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_home(&pca_home())
    }
}

impl Settings {
    /// Default settings rooted at `home`.
    pub fn with_home(home: &Path) -> Self {
        let system_dir = home.join("system");
        let mut pkg_flags = HashMap::new();
        pkg_flags.insert(
            PackageManager::Apt.as_str().to_string(),
            "-oAcquire::AllowUnsizedPackages=1 -oAcquire::http::Pipeline-Depth=0 -y -qq --allow-downgrades"
                .to_string(),
        );
        Self {
            debug: false,
            secret: uuid::Uuid::new_v4().to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            rpc_addr: DEFAULT_RPC_ADDR.to_string(),
            info_dir: home.join("install.d"),
            app_folder: system_dir.join("apps"),
            tmp_dir: system_dir.join("tmp"),
            log_dir: system_dir.join("logs"),
            system_dir,
            pkg_flags,
            net_info: NetSettings::default(),
            remote_commands_enabled: true,
            commands_timeout: DEFAULT_COMMANDS_TIMEOUT_SECS,
            log_buffer_limit: DEFAULT_LOG_BUFFER_LIMIT,
        }
    }

    /// Loads settings from `path`, writing defaults there when the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading pca settings from {}", path.display());
        if !path.exists() {
            let home = path.parent().unwrap_or_else(|| Path::new(DEFAULT_PCA_HOME));
            let settings = Self::with_home(home);
            debug!(
                "Settings file {} not found, writing defaults",
                path.display()
            );
            settings.save_to(path)?;
            return Ok(settings);
        }
        let raw = fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|e| {
            PcaError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Creates every directory the agent writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.info_dir,
            &self.system_dir,
            &self.app_folder,
            &self.tmp_dir,
            &self.log_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                PcaError::Config(format!(
                    "Can't create {} (try admin permissions): {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    pub fn log_buffer_path(&self) -> PathBuf {
        self.log_dir.join(LOG_BUFFER_FILENAME)
    }

    pub fn app_path(&self, external_key: &str) -> PathBuf {
        self.app_folder.join(external_key)
    }

    pub fn pkg_flags_for(&self, manager: PackageManager) -> String {
        match self.pkg_flags.get(manager.as_str()) {
            Some(flags) => flags.clone(),
            None => {
                warn!("No flags configured for {}", manager.as_str());
                String::new()
            }
        }
    }

    pub fn commands_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.commands_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = Settings::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.info_dir, dir.path().join("install.d"));

        let reloaded = Settings::load_from(&path).unwrap();
        assert_eq!(reloaded.secret, settings.secret);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"debug": true, "net_info": {"control_host": "cp.local", "control_port": 8080}}"#)
            .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.net_info.base_url(), "https://cp.local:8080");
        assert_eq!(settings.commands_timeout, DEFAULT_COMMANDS_TIMEOUT_SECS);
    }
}
