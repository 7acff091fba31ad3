// pca-common/src/pipeline.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PcaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Download,
    Verify,
    Unpack,
    Install,
}

/// Progress emitted by the acquisition pipeline and install orchestrator.
///
/// Delivery is advisory: senders ignore failures and nothing waits on a receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PhaseStarted {
        phase: Phase,
        artifacts: usize,
    },
    DownloadStarted {
        artifact: String,
        total_bytes: u64,
    },
    DownloadProgress {
        artifact: String,
        loaded_bytes: u64,
        total_bytes: u64,
    },
    DownloadFinished {
        artifact: String,
        path: PathBuf,
        size_bytes: u64,
    },
    DownloadFailed {
        artifact: String,
        error: String, // Keep as String for simplicity in events
    },
    ChecksumVerified {
        artifact: String,
    },
    ChecksumFailed {
        artifact: String,
        error: String,
    },
    UnpackFinished {
        artifact: String,
        path: PathBuf,
    },
    UnpackFailed {
        artifact: String,
        error: String,
    },
    InstallStarted {
        software: String,
        kind: String,
    },
    InstallFinished {
        software: String,
    },
    InstallFailed {
        software: String,
        error: String,
    },
    RollbackFinished {
        software: String,
        ok: bool,
    },
    LogInfo {
        message: String,
    },
    LogWarn {
        message: String,
    },
}

impl PipelineEvent {
    pub fn download_failed(artifact: String, error: &PcaError) -> Self {
        PipelineEvent::DownloadFailed {
            artifact,
            error: error.to_string(),
        }
    }

    pub fn install_failed(software: String, error: &PcaError) -> Self {
        PipelineEvent::InstallFailed {
            software,
            error: error.to_string(),
        }
    }
}
