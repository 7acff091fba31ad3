// pca-aio/src/fs.rs
//! Filesystem primitives shared by the install backends and the ledger.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pca_common::error::{PcaError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        PcaError::from(e)
    })
}

/// Removes a file. A missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    debug!("Removing file: {}", path.display());
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove file {}: {}", path.display(), e);
            Err(PcaError::from(e))
        }
    }
}

/// Removes a directory tree. A missing directory is not an error.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    debug!("Removing directory recursively: {}", path.display());
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove dir_all {}: {}", path.display(), e);
            Err(PcaError::from(e))
        }
    }
}

/// Copies the contents of `src` into `dest`, overwriting existing files.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    debug!("Copying tree {} -> {}", src.display(), dest.display());
    create_dir_all(dest)?;
    let mut options = fs_extra::dir::CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;
    fs_extra::dir::copy(src, dest, &options).map_err(|e| {
        error!("Failed copy {} -> {}: {}", src.display(), dest.display(), e);
        PcaError::Generic(format!(
            "Failed to copy {} to {}: {e}",
            src.display(),
            dest.display()
        ))
    })
}

/// First regular file under `root` whose name ends with `suffix`.
pub fn find_file_with_suffix(root: &Path, suffix: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.into_path())
}

/// First regular file under `root` named exactly `name`.
pub fn find_file_named(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name() == name)
        .map(|entry| entry.into_path())
}

/// `*.json` files directly inside `dir`, sorted by name.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry_res in fs::read_dir(dir)? {
        match entry_res {
            Ok(entry) => {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
            Err(e) => warn!("Error reading entry in {}: {}", dir.display(), e),
        }
    }
    files.sort();
    Ok(files)
}

/// Replaces `target` with the contents of `source` through a sibling temp file
/// that gets mode 0755 before the rename.
pub fn replace_executable(source: &Path, target: &Path) -> Result<()> {
    let dir = target.parent().ok_or_else(|| {
        PcaError::Generic(format!(
            "Cannot get parent directory for {}",
            target.display()
        ))
    })?;
    let content = fs::read(source)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let temp_path = temp_file.path().to_path_buf();
    debug!(
        "Replacing executable {} via temp file {}",
        target.display(),
        temp_path.display()
    );
    temp_file.write_all(&content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o755))?;
    }

    temp_file.persist(target).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            target.display(),
            e.error
        );
        PcaError::Io(Arc::new(e.error))
    })?;
    Ok(())
}
