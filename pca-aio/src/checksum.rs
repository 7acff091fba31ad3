// pca-aio/src/checksum.rs
use std::path::{Path, PathBuf};

use pca_common::error::{PcaError, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

fn sha256_file_sync(path: &Path) -> Result<String> {
    let std_file = std::fs::File::open(path)?;
    let mut std_reader = std::io::BufReader::new(std_file);
    let mut hasher = Sha256::new();
    let bytes_copied = std::io::copy(&mut std_reader, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    debug!(
        "Calculated SHA256 of {}: {} ({} bytes read)",
        path.display(),
        actual,
        bytes_copied
    );
    Ok(actual)
}

/// Streams the file through SHA-256 on the blocking pool and returns the lowercase hex digest.
pub async fn sha256_file_async(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file_sync(&path))
        .await
        .map_err(|e| PcaError::Generic(format!("JoinError in checksum task: {e}")))?
}

/// Verifies the file against `expected`. The comparison is case-sensitive.
pub async fn verify_checksum_async(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for: {}", path.display());
    let actual = sha256_file_async(path).await?;
    debug!("Expected SHA256:   {}", expected);

    if actual == expected {
        Ok(())
    } else {
        Err(PcaError::ChecksumMismatch(format!(
            "{}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        verify_checksum_async(&path, expected).await.unwrap();
        verify_checksum_async(&path, expected).await.unwrap();
    }

    #[tokio::test]
    async fn comparison_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let err = verify_checksum_async(&path, upper).await.unwrap_err();
        assert!(matches!(err, PcaError::ChecksumMismatch(_)));
    }
}
