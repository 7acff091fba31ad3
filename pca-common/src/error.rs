use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PcaError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("API Error: {0}")]
    Api(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Build metadata unavailable for '{0}': {1}")]
    MetadataUnavailable(String, String),

    #[error("Transfer failed for '{0}': {1}")]
    TransferFailed(String, String),

    #[error("Checksum Mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Invalid file path in archive: {0}")]
    ArchiveTraversal(String),

    #[error("Unsupported archive type '{0}'")]
    UnsupportedArchiveType(String),

    #[error("Installer failed: {0}")]
    InstallerFailed(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Service is busy: lock held by {0}")]
    ServiceBusy(String),

    #[error("Failed to write ledger entry {0}: {1}")]
    LedgerWriteFailed(String, String),

    #[error("Invalid build status transition: {0}")]
    InvalidTransition(String),

    #[error("RPC Error: {0}")]
    Rpc(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl PcaError {
    /// Errors after which the agent must not continue running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PcaError::UnsupportedArchiveType(_))
    }
}

impl From<std::io::Error> for PcaError {
    fn from(err: std::io::Error) -> Self {
        PcaError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for PcaError {
    fn from(err: reqwest::Error) -> Self {
        PcaError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for PcaError {
    fn from(err: serde_json::Error) -> Self {
        PcaError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for PcaError {
    fn from(err: semver::Error) -> Self {
        PcaError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PcaError>;
