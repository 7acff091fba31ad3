// pca-aio/src/extract.rs
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use pca_common::error::{PcaError, Result};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Rejects absolute entries and any entry climbing out of the target with `..`.
pub fn validate_entry_name(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PcaError::ArchiveTraversal(name.to_string()));
            }
        }
    }
    Ok(relative)
}

fn extract_zip_sync(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| PcaError::Generic(format!("Failed to open ZIP: {e}")))?;

    // Every entry is checked before anything touches the disk.
    let mut planned = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| PcaError::Generic(format!("Failed to access ZIP entry: {e}")))?;
        let relative = validate_entry_name(entry.name())?;
        planned.push(relative);
    }

    std::fs::create_dir_all(target_dir)?;
    for (i, relative) in planned.into_iter().enumerate() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PcaError::Generic(format!("Failed to access ZIP entry: {e}")))?;
        let outpath = target_dir.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode & 0o7777))
            {
                warn!("Failed to set mode {:o} on {}: {}", mode, outpath.display(), e);
            }
        }
    }
    Ok(())
}

/// Extracts a ZIP archive into `target_dir` on the blocking pool.
pub async fn extract_zip_async(archive_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    debug!(
        "Extracting ZIP '{}' to '{}'",
        archive_path.display(),
        target_dir.display()
    );
    let archive_path = archive_path.to_path_buf();
    let target = target_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        extract_zip_sync(&archive_path, &target)?;
        Ok(target)
    })
    .await
    .map_err(|e| PcaError::Generic(format!("JoinError in ZIP extraction: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data, mode) in entries {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_nested_tree_with_modes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.zip");
        write_zip(
            &archive,
            &[("bin/run.sh", b"#!/bin/sh\n", 0o755), ("etc/app.conf", b"k=v", 0o644)],
        );
        let target = dir.path().join("out");
        extract_zip_async(&archive, &target).await.unwrap();

        assert_eq!(std::fs::read(target.join("etc/app.conf")).unwrap(), b"k=v");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(target.join("bin/run.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn parent_dir_entry_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("ok.txt", b"fine", 0o644), ("../escaped.txt", b"bad", 0o644)],
        );
        let target = dir.path().join("out");
        let err = extract_zip_async(&archive, &target).await.unwrap_err();
        assert!(matches!(err, PcaError::ArchiveTraversal(_)));
        assert!(!target.exists());
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn absolute_entry_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("abs.zip");
        write_zip(
            &archive,
            &[("ok.txt", b"fine", 0o644), ("/abs.txt", b"bad", 0o644)],
        );
        let target = dir.path().join("out");
        let err = extract_zip_async(&archive, &target).await.unwrap_err();
        assert!(matches!(err, PcaError::ArchiveTraversal(ref name) if name == "/abs.txt"));
        assert!(!target.exists());
        assert!(!Path::new("/abs.txt").exists());
    }

    #[test]
    fn absolute_entry_names_are_rejected() {
        assert!(matches!(
            validate_entry_name("/etc/passwd"),
            Err(PcaError::ArchiveTraversal(_))
        ));
        assert!(validate_entry_name("a/./b").is_ok());
        assert!(validate_entry_name("a/../../b").is_err());
    }
}
