// pca-core/src/acquire/verify.rs
use pca_common::error::{PcaError, Result};
use pca_common::model::BuildArtifact;
use pca_common::pipeline::PipelineEvent;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{failure_message, PhaseOutcome};

fn is_sha256(algorithm: &str) -> bool {
    matches!(
        algorithm.to_ascii_lowercase().as_str(),
        "sha256" | "sha-256"
    )
}

pub(crate) async fn verify_artifact(
    mut artifact: BuildArtifact,
    event_tx: broadcast::Sender<PipelineEvent>,
) -> PhaseOutcome {
    let outcome = verify_inner(&mut artifact).await;
    match &outcome {
        Ok(()) => {
            event_tx
                .send(PipelineEvent::ChecksumVerified {
                    artifact: artifact.name.clone(),
                })
                .ok();
        }
        Err(e) => {
            warn!("Checksum validation failed for {}: {}", artifact.name, e);
            artifact.fail(failure_message(e));
            event_tx
                .send(PipelineEvent::ChecksumFailed {
                    artifact: artifact.name.clone(),
                    error: e.to_string(),
                })
                .ok();
        }
    }
    (artifact, outcome)
}

async fn verify_inner(artifact: &mut BuildArtifact) -> Result<()> {
    if artifact.valid_checksum {
        debug!("{} already verified", artifact.name);
        return Ok(());
    }
    if !is_sha256(&artifact.hash_algorithm) {
        return Err(PcaError::ChecksumMismatch(format!(
            "{}: unsupported hash algorithm '{}'",
            artifact.name, artifact.hash_algorithm
        )));
    }
    let path = artifact.local_path.clone().ok_or_else(|| {
        PcaError::ChecksumMismatch(format!("{}: nothing downloaded", artifact.name))
    })?;
    pca_aio::verify_checksum_async(&path, &artifact.hash_value).await?;
    artifact.valid_checksum = true;
    Ok(())
}
