// pca-core/src/acquire/unpack.rs
use std::path::{Path, PathBuf};

use pca_common::error::{PcaError, Result};
use pca_common::model::{ArchiveType, BuildArtifact, BuildStatus};
use pca_common::pipeline::PipelineEvent;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::{failure_message, PhaseOutcome};

pub(crate) async fn unpack_artifact(
    mut artifact: BuildArtifact,
    tmp_dir: PathBuf,
    event_tx: broadcast::Sender<PipelineEvent>,
) -> PhaseOutcome {
    let outcome = unpack_inner(&mut artifact, &tmp_dir).await;
    match &outcome {
        Ok(()) => {
            if let Some(path) = artifact.local_path.clone() {
                event_tx
                    .send(PipelineEvent::UnpackFinished {
                        artifact: artifact.name.clone(),
                        path,
                    })
                    .ok();
            }
        }
        Err(e) => {
            error!("Unpack failed for {}: {}", artifact.name, e);
            artifact.fail(failure_message(e));
            event_tx
                .send(PipelineEvent::UnpackFailed {
                    artifact: artifact.name.clone(),
                    error: e.to_string(),
                })
                .ok();
        }
    }
    (artifact, outcome)
}

async fn unpack_inner(artifact: &mut BuildArtifact, tmp_dir: &Path) -> Result<()> {
    if !artifact.valid_checksum {
        return Err(PcaError::InvalidTransition(format!(
            "{} cannot be unpacked before its checksum is verified",
            artifact.name
        )));
    }
    if let ArchiveType::Other(kind) = &artifact.archive_type {
        return Err(PcaError::UnsupportedArchiveType(kind.clone()));
    }
    let archive = artifact.local_path.clone().ok_or_else(|| {
        PcaError::Generic(format!("{}: downloaded archive path missing", artifact.name))
    })?;
    let target = artifact.unpack_dir(tmp_dir);
    // A stale tree from an earlier attempt would mix files from two builds.
    pca_aio::remove_dir_if_exists(&target)?;

    debug!("Unpacking {} into {}", archive.display(), target.display());
    let unpacked = pca_aio::extract_zip_async(&archive, &target).await?;
    artifact.local_path = Some(unpacked);
    artifact.status.advance(BuildStatus::Unpacked)
}
