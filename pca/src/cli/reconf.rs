// pca/src/cli/reconf.rs
use std::env;
use std::path::Path;

use clap::Args;
use colored::Colorize;
use pca_common::config::Settings;
use pca_common::error::{PcaError, Result};
use tracing::{debug, warn};

use crate::rpc::RpcClient;

const FALLBACK_EDITORS: &[&str] = &["micro", "nano", "vim", "vi"];

/// Edit the configuration and apply it to the running daemon
#[derive(Args, Debug)]
pub struct Reconf {}

/// `$VISUAL`, then `$EDITOR`, then the first fallback found on `PATH`.
fn find_editor() -> Result<Vec<String>> {
    for var in ["VISUAL", "EDITOR"] {
        if let Ok(value) = env::var(var) {
            let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                return Ok(parts);
            }
        }
    }
    FALLBACK_EDITORS
        .iter()
        .find(|candidate| which::which(candidate).is_ok())
        .map(|editor| vec![editor.to_string()])
        .ok_or_else(|| PcaError::Config("no editor found, set $EDITOR".to_string()))
}

/// Restores `backup` when `outcome` failed.
fn keep_or_restore(config_path: &Path, backup: &[u8], outcome: Result<Settings>) -> Result<Settings> {
    if outcome.is_err() {
        warn!("Restoring previous configuration at {}", config_path.display());
        std::fs::write(config_path, backup)?;
    }
    outcome
}

impl Reconf {
    pub async fn run(&self, config_path: &Path, settings: &Settings) -> Result<()> {
        let backup = std::fs::read(config_path)?;
        let editor = find_editor()?;
        debug!("Opening {} with {:?}", config_path.display(), editor);

        let status = tokio::process::Command::new(&editor[0])
            .args(&editor[1..])
            .arg(config_path)
            .status()
            .await;
        let outcome = match status {
            Ok(status) if status.success() => Settings::load_from(config_path),
            Ok(status) => Err(PcaError::CommandExecError(format!(
                "{} exited with {}",
                editor[0], status
            ))),
            Err(e) => Err(PcaError::CommandExecError(format!("{}: {}", editor[0], e))),
        };
        keep_or_restore(config_path, &backup, outcome)?;

        // The running daemon still listens on the old address.
        match RpcClient::connect(&settings.rpc_addr).await {
            Some(mut client) => {
                client.reconfigure().await?;
                println!("{} Daemon reconfigured", "✓".green().bold());
            }
            None => println!("No daemon running, new settings apply at next start"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_edit_restores_the_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let original = serde_json::to_vec_pretty(&Settings::with_home(dir.path())).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let outcome = Settings::load_from(&path);
        assert!(keep_or_restore(&path, &original, outcome).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert!(Settings::load_from(&path).is_ok());
    }

    #[test]
    fn valid_edit_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut edited = Settings::with_home(dir.path());
        edited.commands_timeout = 5;
        edited.save_to(&path).unwrap();

        let kept = keep_or_restore(&path, b"old", Settings::load_from(&path)).unwrap();
        assert_eq!(kept.commands_timeout, 5);
        assert_ne!(std::fs::read(&path).unwrap(), b"old");
    }
}
