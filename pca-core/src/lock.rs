// pca-core/src/lock.rs
//! In-process side of the cross-process operation lock. The daemon owns one and
//! exposes it over RPC; CLI invocations and scheduled units acquire it.
use std::sync::{Arc, Mutex, MutexGuard};

use pca_common::error::{PcaError, Result};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct OperationLock {
    holder: Arc<Mutex<Option<String>>>,
}

/// Releases the lock when dropped, unless someone else holds it by then.
#[derive(Debug)]
pub struct LockLease {
    lock: OperationLock,
    holder: String,
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.lock.release_held(&self.holder);
    }
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Option<String>> {
        // A poisoned state is still a valid Option.
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Non-blocking acquire. Contention names the current holder.
    pub fn try_acquire(&self, holder: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(current) = state.as_ref() {
            return Err(PcaError::ServiceBusy(current.clone()));
        }
        debug!("Operation lock acquired by {}", holder);
        *state = Some(holder.to_string());
        Ok(())
    }

    pub fn lease(&self, holder: &str) -> Result<LockLease> {
        self.try_acquire(holder)?;
        Ok(LockLease {
            lock: self.clone(),
            holder: holder.to_string(),
        })
    }

    /// Always succeeds, also when the lock is free.
    pub fn release(&self) {
        if let Some(prev) = self.state().take() {
            debug!("Operation lock released by {}", prev);
        }
    }

    /// Releases only when `holder` is the current holder. Returns whether it did.
    pub fn release_held(&self, holder: &str) -> bool {
        let mut state = self.state();
        if state.as_deref() != Some(holder) {
            return false;
        }
        *state = None;
        debug!("Operation lock released by {}", holder);
        true
    }

    pub fn holder(&self) -> Option<String> {
        self.state().clone()
    }

    pub fn is_held(&self) -> bool {
        self.state().is_some()
    }
}
