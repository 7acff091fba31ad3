// pca-core/src/logbuf.rs
//! Local buffer for telemetry events the control plane could not take yet.
use std::path::{Path, PathBuf};

use pca_common::error::Result;
use pca_common::model::api::{LogBufferDocument, LogEvent};
use pca_net::ControlPlane;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct LogBuffer {
    path: PathBuf,
    limit: usize,
    guard: Mutex<()>,
}

impl LogBuffer {
    pub fn new(path: &Path, limit: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            limit: limit.max(1),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<LogBufferDocument> {
        if !self.path.exists() {
            return Ok(LogBufferDocument::default());
        }
        match pca_aio::read_json_async(&self.path).await {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!("Log buffer {} unreadable, starting fresh: {}", self.path.display(), e);
                Ok(LogBufferDocument::default())
            }
        }
    }

    pub async fn load(&self) -> Result<Vec<LogEvent>> {
        let _held = self.guard.lock().await;
        Ok(self.read().await?.logs)
    }

    /// Appends `events`, dropping the oldest entries past the limit.
    pub async fn push(&self, events: Vec<LogEvent>) -> Result<()> {
        let _held = self.guard.lock().await;
        let mut doc = self.read().await?;
        doc.logs.extend(events);
        if doc.logs.len() > self.limit {
            let excess = doc.logs.len() - self.limit;
            warn!("Log buffer full, dropping {} oldest event(s)", excess);
            doc.logs.drain(..excess);
        }
        pca_aio::write_json_async(&self.path, &doc).await
    }

    pub async fn clear(&self) -> Result<()> {
        let _held = self.guard.lock().await;
        pca_aio::write_json_async(&self.path, &LogBufferDocument::default()).await
    }

    /// Sends buffered events upstream. The buffer is emptied only after delivery succeeds.
    pub async fn flush(&self, control: &dyn ControlPlane) -> Result<usize> {
        let _held = self.guard.lock().await;
        let doc = self.read().await?;
        if doc.logs.is_empty() {
            return Ok(0);
        }
        control.post_logs(&doc.logs).await?;
        pca_aio::write_json_async(&self.path, &LogBufferDocument::default()).await?;
        debug!("Flushed {} buffered log event(s)", doc.logs.len());
        Ok(doc.logs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeControlPlane;

    fn event(n: usize) -> LogEvent {
        LogEvent {
            product: format!("p{n}"),
            level: "info".into(),
            context: Some(serde_json::Map::new()),
        }
    }

    #[tokio::test]
    async fn oldest_events_are_dropped_at_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new(&dir.path().join("soft.log.json"), 3);
        buffer.push((0..2).map(event).collect()).await.unwrap();
        buffer.push((2..5).map(event).collect()).await.unwrap();
        let products: Vec<_> = buffer.load().await.unwrap().into_iter().map(|e| e.product).collect();
        assert_eq!(products, vec!["p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn flush_clears_only_after_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new(&dir.path().join("soft.log.json"), 10);
        buffer.push(vec![event(1), event(2)]).await.unwrap();

        let control = FakeControlPlane::default();
        control.fail_logs(true);
        assert!(buffer.flush(&control).await.is_err());
        assert_eq!(buffer.load().await.unwrap().len(), 2);

        control.fail_logs(false);
        assert_eq!(buffer.flush(&control).await.unwrap(), 2);
        assert!(buffer.load().await.unwrap().is_empty());
        assert_eq!(control.posted_logs().len(), 2);

        let raw = std::fs::read_to_string(buffer.path()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc, serde_json::json!({"logs": []}));
    }
}
