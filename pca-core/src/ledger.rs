// pca-core/src/ledger.rs
//! Installed-state ledger: one JSON document per installed package under the info dir.
use std::path::{Path, PathBuf};

use pca_common::error::{PcaError, Result};
use pca_common::model::InstalledRecord;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    records: Vec<InstalledRecord>,
    pending: Option<InstalledRecord>,
}

impl Ledger {
    /// An empty ledger rooted at `dir`. Nothing is read until [`Ledger::reload`].
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            records: Vec::new(),
            pending: None,
        }
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        let mut ledger = Self::new(dir);
        ledger.reload().await?;
        Ok(ledger)
    }

    /// Re-reads every `*.json` record. Malformed files are skipped with a warning.
    pub async fn reload(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut records = Vec::new();
        for path in pca_aio::list_json_files(&self.dir)? {
            match pca_aio::read_json_async::<InstalledRecord>(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed ledger entry {}: {}", path.display(), e),
            }
        }
        debug!("Loaded {} ledger record(s) from {}", records.len(), self.dir.display());
        self.records = records;
        self.reindex();
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records(&self) -> &[InstalledRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, package_id: i64) -> Option<&InstalledRecord> {
        self.records.iter().find(|r| r.package_id() == package_id)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&InstalledRecord> {
        self.records.iter().find(|r| r.index() == index)
    }

    /// Holds `record` apart until the transaction that installs it succeeds.
    pub fn stage(&mut self, record: InstalledRecord) {
        self.pending = Some(record);
    }

    pub fn pending(&self) -> Option<&InstalledRecord> {
        self.pending.as_ref()
    }

    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    /// Moves the staged record into the ledger and persists everything.
    pub async fn commit(&mut self) -> Result<()> {
        let record = self
            .pending
            .take()
            .ok_or_else(|| PcaError::Generic("no staged ledger record".to_string()))?;
        self.insert(record);
        self.persist().await;
        Ok(())
    }

    fn insert(&mut self, record: InstalledRecord) {
        self.records.retain(|r| r.package_id() != record.package_id());
        self.records.push(record);
        self.reindex();
    }

    /// Replaces the record for `old_package_id` wholesale, used by update and patch.
    pub async fn replace(&mut self, old_package_id: i64, record: InstalledRecord) -> Result<()> {
        if let Some(old) = self.get(old_package_id) {
            if old.package.name != record.package.name {
                pca_aio::remove_file_if_exists(&self.dir.join(old.file_name()))?;
            }
        }
        self.records.retain(|r| r.package_id() != old_package_id);
        self.insert(record);
        self.persist().await;
        Ok(())
    }

    /// Drops a record and its file. Unknown ids are a logged no-op.
    ///
    /// The record stays in the ledger when its file can't be deleted.
    pub async fn remove(&mut self, package_id: i64) -> Result<bool> {
        let Some(pos) = self.records.iter().position(|r| r.package_id() == package_id) else {
            warn!("Package with id {} not found in ledger, skip", package_id);
            return Ok(false);
        };
        let path = self.dir.join(self.records[pos].file_name());
        pca_aio::remove_file_if_exists(&path).map_err(|e| {
            PcaError::LedgerWriteFailed(path.display().to_string(), e.to_string())
        })?;
        self.records.remove(pos);
        self.reindex();
        self.persist().await;
        Ok(true)
    }

    /// Dense 1-based indices in ascending package id order.
    fn reindex(&mut self) {
        self.records.sort_by_key(|r| r.package_id());
        for (i, record) in self.records.iter_mut().enumerate() {
            record.package.inner_index = i + 1;
        }
    }

    /// Writes every record. A failing record is logged and skipped; returns how many failed.
    pub async fn persist(&self) -> usize {
        let mut failed = 0;
        for record in &self.records {
            let path = self.dir.join(record.file_name());
            if let Err(e) = pca_aio::write_json_async(&path, record).await {
                failed += 1;
                warn!(
                    "{}",
                    PcaError::LedgerWriteFailed(path.display().to_string(), e.to_string())
                );
            }
        }
        failed
    }
}
