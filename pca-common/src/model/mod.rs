// pca-common/src/model/mod.rs
// Declares the modules within the model directory.
pub mod api;
pub mod artifact;
pub mod installed;
pub mod package;
pub mod software;

// Re-export
pub use artifact::{ArchiveType, ArtifactHead, BuildArtifact, BuildStatus};
pub use installed::{
    AutorunInfo, InstallationResult, InstalledRecord, PackageControlInfo, ServiceInfo,
};
pub use package::{Client, Package, PackageItem, Product, Unit};
pub use software::{Build, Software, SoftwareKind};

/// OS package managers the agent can drive for non-application software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    Apt,
}

impl PackageManager {
    pub const ALL: [PackageManager; 1] = [PackageManager::Apt];

    /// Name of the manager binary and key into `Settings::pkg_flags`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
        }
    }

    /// Package system reported to the control plane.
    pub fn system_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "deb",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PackageManager::Apt => ".deb",
        }
    }
}
