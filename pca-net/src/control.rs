// pca-net/src/control.rs
use std::path::Path;

use async_trait::async_trait;
use pca_common::error::Result;
use pca_common::model::api::{
    LogEvent, Notification, RegistrationRequest, RemoteCommand, SoftwareConfig,
};
use pca_common::model::{ArtifactHead, Client, Package, Product, Software, Unit};

/// Where build artifacts come from.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// HEAD probe for the build's size, digest and archive type.
    async fn build_head(&self, build_id: i64) -> Result<ArtifactHead>;

    /// Streams the build body into `dest`, calling `progress` with the running
    /// byte count after every chunk. Returns the number of bytes written.
    async fn download_build(
        &self,
        build_id: i64,
        dest: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64>;
}

/// Everything the agent asks of the remote control plane.
#[async_trait]
pub trait ControlPlane: BuildSource {
    async fn register(&self, request: &RegistrationRequest) -> Result<()>;
    async fn clients(&self) -> Result<Vec<Client>>;
    async fn products(&self, client_id: i64) -> Result<Vec<Product>>;
    async fn units(&self, product_id: i64) -> Result<Vec<Unit>>;
    async fn unit_updates(&self, unit_id: i64) -> Result<Vec<Package>>;
    async fn latest_patch(&self, software_id: i64) -> Result<Option<Software>>;
    async fn software_config(&self, software_id: i64) -> Result<Option<SoftwareConfig>>;
    async fn notify(&self, notification: &Notification) -> Result<()>;
    async fn next_command(&self) -> Result<Option<RemoteCommand>>;
    async fn post_logs(&self, events: &[LogEvent]) -> Result<()>;
    async fn self_update(&self) -> Result<Option<Software>>;
}
