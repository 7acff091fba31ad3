// pca-common/src/model/artifact.rs
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};

/// Lifecycle of a downloaded build artifact.
///
/// `Created -> Downloaded -> Unpacked -> Installed`, with `Errored` reachable
/// from every state before `Installed`. Steps cannot be skipped and the only
/// way back is [`BuildStatus::reset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BuildStatus {
    #[default]
    Created,
    Downloaded,
    Unpacked,
    Installed,
    Errored(String),
}

impl BuildStatus {
    fn rank(&self) -> Option<u8> {
        match self {
            BuildStatus::Created => Some(0),
            BuildStatus::Downloaded => Some(1),
            BuildStatus::Unpacked => Some(2),
            BuildStatus::Installed => Some(3),
            BuildStatus::Errored(_) => None,
        }
    }

    /// Moves to `next`, which must be the immediate successor.
    pub fn advance(&mut self, next: BuildStatus) -> Result<()> {
        match (self.rank(), next.rank()) {
            (Some(cur), Some(n)) if n == cur + 1 => {
                *self = next;
                Ok(())
            }
            _ => Err(PcaError::InvalidTransition(format!("{self} -> {next}"))),
        }
    }

    /// Diverts to `Errored`. An already errored status keeps its first message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        match self {
            BuildStatus::Errored(_) => Ok(()),
            BuildStatus::Installed => Err(PcaError::InvalidTransition(
                "Installed -> Errored".to_string(),
            )),
            _ => {
                *self = BuildStatus::Errored(message.into());
                Ok(())
            }
        }
    }

    /// Retry reset, used when a build is fetched again.
    pub fn reset(&mut self) {
        *self = BuildStatus::Created;
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BuildStatus::Errored(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, BuildStatus::Errored(_))
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Created => write!(f, "Created"),
            BuildStatus::Downloaded => write!(f, "Downloaded"),
            BuildStatus::Unpacked => write!(f, "Unpacked"),
            BuildStatus::Installed => write!(f, "Installed"),
            BuildStatus::Errored(msg) => write!(f, "Errored({msg})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArchiveType {
    Zip,
    Other(String),
}

impl From<String> for ArchiveType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "zip" | "x-zip-compressed" => ArchiveType::Zip,
            _ => ArchiveType::Other(value),
        }
    }
}

impl From<ArchiveType> for String {
    fn from(value: ArchiveType) -> Self {
        value.extension().to_string()
    }
}

impl ArchiveType {
    pub fn extension(&self) -> &str {
        match self {
            ArchiveType::Zip => "zip",
            ArchiveType::Other(ext) => ext,
        }
    }
}

/// File metadata announced by the control plane's HEAD response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHead {
    pub size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
    pub archive_type: ArchiveType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
    pub archive_type: ArchiveType,
    #[serde(default)]
    pub loaded_bytes: u64,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default)]
    pub valid_checksum: bool,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl BuildArtifact {
    pub fn new(id: i64, logical_name: &str, head: ArtifactHead) -> Self {
        Self {
            id,
            name: sanitize_name(logical_name),
            size: head.size,
            hash_algorithm: head.hash_algorithm,
            hash_value: head.hash_value,
            archive_type: head.archive_type,
            loaded_bytes: 0,
            status: BuildStatus::Created,
            valid_checksum: false,
            local_path: None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.archive_type.extension())
    }

    pub fn download_path(&self, tmp_dir: &Path) -> PathBuf {
        tmp_dir.join(self.file_name())
    }

    pub fn unpack_dir(&self, tmp_dir: &Path) -> PathBuf {
        tmp_dir.join(&self.name)
    }

    pub fn is_complete(&self) -> bool {
        self.loaded_bytes == self.size
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        // Installed artifacts are never failed by the pipeline.
        let _ = self.status.fail(message);
    }

    pub fn mark_installed(&mut self) -> Result<()> {
        let has_path = self
            .local_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if !self.valid_checksum || !has_path {
            return Err(PcaError::InvalidTransition(format!(
                "{} cannot be Installed without a verified checksum and local path",
                self.name
            )));
        }
        self.status.advance(BuildStatus::Installed)
    }

    /// Clears per-run state so the artifact can be fetched again.
    pub fn reset(&mut self) {
        self.loaded_bytes = 0;
        self.valid_checksum = false;
        self.local_path = None;
        self.status.reset();
    }
}

pub fn sanitize_name(name: &str) -> String {
    name.replace(' ', "_")
}
