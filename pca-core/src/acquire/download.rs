// pca-core/src/acquire/download.rs
use std::path::PathBuf;
use std::sync::Arc;

use pca_common::error::{PcaError, Result};
use pca_common::model::{BuildArtifact, BuildStatus};
use pca_common::pipeline::PipelineEvent;
use pca_net::ControlPlane;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{failure_message, PhaseOutcome};

pub(crate) async fn download_artifact(
    control: Arc<dyn ControlPlane>,
    tmp_dir: PathBuf,
    mut artifact: BuildArtifact,
    event_tx: broadcast::Sender<PipelineEvent>,
) -> PhaseOutcome {
    let outcome = download_inner(control.as_ref(), &tmp_dir, &mut artifact, &event_tx).await;
    if let Err(e) = &outcome {
        warn!("[Downloader] Download failed for {}: {}", artifact.name, e);
        artifact.fail(failure_message(e));
        event_tx
            .send(PipelineEvent::download_failed(artifact.name.clone(), e))
            .ok();
    }
    (artifact, outcome)
}

async fn download_inner(
    control: &dyn ControlPlane,
    tmp_dir: &std::path::Path,
    artifact: &mut BuildArtifact,
    event_tx: &broadcast::Sender<PipelineEvent>,
) -> Result<()> {
    let dest = artifact.download_path(tmp_dir);
    let name = artifact.name.clone();
    let total = artifact.size;
    event_tx
        .send(PipelineEvent::DownloadStarted {
            artifact: name.clone(),
            total_bytes: total,
        })
        .ok();

    let loaded = if total == 0 {
        // Nothing to stream: the artifact is complete as soon as it exists.
        tokio::fs::create_dir_all(tmp_dir).await?;
        tokio::fs::write(&dest, b"").await?;
        0
    } else {
        let progress_tx = event_tx.clone();
        let progress_name = name.clone();
        let progress = move |loaded_bytes: u64| {
            progress_tx
                .send(PipelineEvent::DownloadProgress {
                    artifact: progress_name.clone(),
                    loaded_bytes,
                    total_bytes: total,
                })
                .ok();
        };
        control
            .download_build(artifact.id, &dest, &progress)
            .await
            .map_err(|e| PcaError::TransferFailed(name.clone(), e.to_string()))?
    };

    artifact.loaded_bytes = loaded;
    if !artifact.is_complete() {
        return Err(PcaError::TransferFailed(
            name,
            format!("received {loaded} of {total} bytes"),
        ));
    }
    artifact.local_path = Some(dest.clone());
    artifact.status.advance(BuildStatus::Downloaded)?;
    debug!("[Downloader] {} complete ({} bytes)", name, loaded);
    event_tx
        .send(PipelineEvent::DownloadFinished {
            artifact: name,
            path: dest,
            size_bytes: loaded,
        })
        .ok();
    Ok(())
}
