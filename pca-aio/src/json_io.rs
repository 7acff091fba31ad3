// pca-aio/src/json_io.rs
use std::path::Path;

use pca_common::error::{PcaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

/// Writes serializable data as indented JSON, truncating any existing file in place.
///
/// This is not atomic: a crash mid-write can leave a partial document behind.
pub async fn write_json_async<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json_bytes = serde_json::to_vec_pretty(data)?;
    fs::write(path, &json_bytes).await?;
    Ok(())
}

/// Reads and deserializes data from a JSON file.
pub async fn read_json_async<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Reading JSON from: {}", path.display());
    let json_bytes = fs::read(path).await?;
    serde_json::from_slice(&json_bytes).map_err(PcaError::from)
}
