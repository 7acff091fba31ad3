// pca-core/src/acquire/mod.rs
//! Download, checksum and unpack phases for a transaction's build artifacts.
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pca_common::error::{PcaError, Result};
use pca_common::model::{BuildArtifact, BuildStatus, Software};
use pca_common::pipeline::{Phase, PipelineEvent};
use pca_net::ControlPlane;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

mod download;
mod unpack;
mod verify;

/// Artifact handed back by a phase task together with that task's outcome.
pub(crate) type PhaseOutcome = (BuildArtifact, Result<()>);

pub struct Acquisition {
    control: Arc<dyn ControlPlane>,
    tmp_dir: PathBuf,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Acquisition {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        tmp_dir: &Path,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            control,
            tmp_dir: tmp_dir.to_path_buf(),
            event_tx,
        }
    }

    /// HEAD probe for the software's build. On success the build gets a fresh artifact.
    pub async fn fetch_head(&self, software: &mut Software) -> Result<()> {
        let logical_name = software.logical_name();
        debug!("Fetching build metadata for {}", logical_name);
        match self.control.build_head(software.build.id).await {
            Ok(head) => {
                software.build.artifact =
                    Some(BuildArtifact::new(software.build.id, &logical_name, head));
                Ok(())
            }
            Err(e) => {
                let err = PcaError::MetadataUnavailable(logical_name, e.to_string());
                error!("{}", err);
                if let Some(artifact) = software.artifact_mut() {
                    artifact.fail(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Runs download-all, verify-all and unpack-all, stopping at the first phase with an error.
    #[instrument(skip_all, fields(artifacts = artifacts.len()))]
    pub async fn run(&self, artifacts: &mut [BuildArtifact]) -> Result<()> {
        self.download_all(artifacts).await?;
        self.verify_all(artifacts).await?;
        self.unpack_all(artifacts).await
    }

    pub async fn download_all(&self, artifacts: &mut [BuildArtifact]) -> Result<()> {
        let control = Arc::clone(&self.control);
        let tmp_dir = self.tmp_dir.clone();
        let tx = self.event_tx.clone();
        run_phase(
            artifacts,
            Phase::Download,
            &self.event_tx,
            |a| a.status == BuildStatus::Created,
            move |artifact| {
                download::download_artifact(
                    Arc::clone(&control),
                    tmp_dir.clone(),
                    artifact,
                    tx.clone(),
                )
            },
        )
        .await
    }

    pub async fn verify_all(&self, artifacts: &mut [BuildArtifact]) -> Result<()> {
        let tx = self.event_tx.clone();
        run_phase(
            artifacts,
            Phase::Verify,
            &self.event_tx,
            |a| a.status == BuildStatus::Downloaded,
            move |artifact| verify::verify_artifact(artifact, tx.clone()),
        )
        .await
    }

    pub async fn unpack_all(&self, artifacts: &mut [BuildArtifact]) -> Result<()> {
        let tmp_dir = self.tmp_dir.clone();
        let tx = self.event_tx.clone();
        run_phase(
            artifacts,
            Phase::Unpack,
            &self.event_tx,
            |a| a.status == BuildStatus::Downloaded,
            move |artifact| unpack::unpack_artifact(artifact, tmp_dir.clone(), tx.clone()),
        )
        .await
    }

    /// Removes downloaded archives and unpacked trees. Best-effort.
    pub async fn cleanup(&self, artifacts: &[BuildArtifact]) {
        for artifact in artifacts {
            for path in [
                artifact.download_path(&self.tmp_dir),
                artifact.unpack_dir(&self.tmp_dir),
            ] {
                let res = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else if path.exists() {
                    tokio::fs::remove_file(&path).await
                } else {
                    Ok(())
                };
                if let Err(e) = res {
                    warn!("Failed to clean {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Error text stored on an artifact that failed a phase.
pub(crate) fn failure_message(err: &PcaError) -> String {
    match err {
        PcaError::ChecksumMismatch(_) => "can't validate checksum".to_string(),
        PcaError::ArchiveTraversal(_) => "Invalid file path in archive".to_string(),
        other => other.to_string(),
    }
}

fn get_panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    match e.downcast_ref::<&'static str>() {
        Some(s) => (*s).to_string(),
        None => match e.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown panic payload".to_string(),
        },
    }
}

/// Spawns `task` for every eligible artifact, waits for all of them, writes the
/// results back in place and returns the error of the lowest-indexed failure.
async fn run_phase<E, F, Fut>(
    artifacts: &mut [BuildArtifact],
    phase: Phase,
    event_tx: &broadcast::Sender<PipelineEvent>,
    eligible: E,
    task: F,
) -> Result<()>
where
    E: Fn(&BuildArtifact) -> bool,
    F: Fn(BuildArtifact) -> Fut,
    Fut: Future<Output = PhaseOutcome> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut slots = HashMap::new();
    for (idx, artifact) in artifacts.iter().enumerate() {
        if artifact.status.is_errored() || !eligible(artifact) {
            continue;
        }
        let handle = tasks.spawn(task(artifact.clone()));
        slots.insert(handle.id(), idx);
    }
    debug!("{:?} phase started for {} artifact(s)", phase, slots.len());
    event_tx
        .send(PipelineEvent::PhaseStarted {
            phase,
            artifacts: slots.len(),
        })
        .ok();

    let mut failures: Vec<(usize, PcaError)> = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, (artifact, outcome))) => {
                let Some(&idx) = slots.get(&id) else {
                    continue;
                };
                artifacts[idx] = artifact;
                if let Err(e) = outcome {
                    failures.push((idx, e));
                }
            }
            Err(join_err) => {
                let Some(&idx) = slots.get(&join_err.id()) else {
                    continue;
                };
                let msg = if join_err.is_panic() {
                    get_panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                error!("{:?} task for {} failed to join: {}", phase, artifacts[idx].name, msg);
                artifacts[idx].fail(msg.clone());
                failures.push((idx, PcaError::Generic(msg)));
            }
        }
    }

    failures.sort_by_key(|(idx, _)| *idx);
    match failures.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}
