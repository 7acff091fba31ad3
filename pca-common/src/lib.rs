// pca-common/src/lib.rs
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;

// Re-export key types
pub use config::Settings;
pub use error::{PcaError, Result};
pub use model::{
    BuildArtifact, BuildStatus, InstallationResult, InstalledRecord, Package, PackageItem,
    PackageManager, Software, SoftwareKind,
};
pub use pipeline::PipelineEvent;
