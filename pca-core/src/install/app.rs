// pca-core/src/install/app.rs
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pca_common::error::{PcaError, Result};
use pca_common::model::InstallationResult;
use tracing::{debug, warn};

use super::PackageBackend;

/// Copies an unpacked application tree to `<app folder>/<external key>`.
#[derive(Debug, Default, Clone)]
pub struct AppBackend {
    dest: String,
}

impl AppBackend {
    pub fn new(dest: &Path) -> Self {
        Self {
            dest: dest.to_string_lossy().into_owned(),
        }
    }

    fn dest(&self) -> Result<PathBuf> {
        if self.dest.is_empty() {
            return Err(PcaError::InstallerFailed(
                "application destination not set".to_string(),
            ));
        }
        Ok(PathBuf::from(&self.dest))
    }
}

#[async_trait]
impl PackageBackend for AppBackend {
    fn name(&self) -> &str {
        &self.dest
    }

    fn set_name(&mut self, name: &str) {
        self.dest = name.to_string();
    }

    async fn parse_package(&mut self, _source: &Path) -> Result<InstallationResult> {
        Ok(InstallationResult::Application { path: self.dest()? })
    }

    async fn install(&mut self, source: &Path) -> Result<()> {
        let dest = self.dest()?;
        let src = source.to_path_buf();
        let target = dest.clone();
        let copied = tokio::task::spawn_blocking(move || pca_aio::copy_tree(&src, &target))
            .await
            .map_err(|e| PcaError::InstallerFailed(format!("copy task failed: {e}")))?;
        match copied {
            Ok(bytes) => {
                debug!("Copied {} bytes into {}", bytes, dest.display());
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = pca_aio::remove_dir_if_exists(&dest) {
                    warn!("Failed to remove partial copy {}: {}", dest.display(), cleanup);
                }
                Err(PcaError::InstallerFailed(format!(
                    "copy to {} failed: {e}",
                    dest.display()
                )))
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        let dest = self.dest()?;
        debug!("Removing application tree {}", dest.display());
        pca_aio::remove_dir_if_exists(&dest)
            .map_err(|e| PcaError::RollbackFailed(format!("{}: {e}", dest.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_then_rollback_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("unpacked");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        std::fs::write(src.join("bin/app"), b"x").unwrap();
        let dest = dir.path().join("apps/webui");

        let mut backend = AppBackend::default();
        backend.set_name(&dest.to_string_lossy());
        let info = backend.parse_package(&src).await.unwrap();
        assert_eq!(info, InstallationResult::Application { path: dest.clone() });

        backend.install(&src).await.unwrap();
        assert!(dest.join("bin/app").is_file());

        backend.rollback().await.unwrap();
        assert!(!dest.exists());
        // Already gone is still a successful rollback.
        backend.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn failed_copy_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("apps/missing");
        let mut backend = AppBackend::new(&dest);
        let err = backend
            .install(&dir.path().join("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, PcaError::InstallerFailed(_)));
        assert!(!dest.exists());
    }
}
