// pca-core/src/scheduler.rs
//! Named background units for the daemon: periodic jobs and run-once listeners.
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use pca_common::error::Result;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type UnitFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type UnitWork = Arc<dyn Fn() -> UnitFuture + Send + Sync>;
pub type UnitCleanup = Box<dyn FnOnce() -> UnitFuture + Send>;

/// When a periodic unit runs next. `None` before its first run and for run-once units.
#[derive(Debug, Clone, Default)]
pub struct NextRun(Arc<Mutex<Option<SystemTime>>>);

impl NextRun {
    pub fn get(&self) -> Option<SystemTime> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, at: Option<SystemTime>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

pub struct ScheduledTask {
    name: String,
    /// Zero means run once.
    interval: Duration,
    work: UnitWork,
    cleanup: Option<UnitCleanup>,
    next_run: NextRun,
}

impl ScheduledTask {
    pub fn new<F, Fut>(name: &str, interval: Duration, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            interval,
            work: Arc::new(move || Box::pin(work()) as UnitFuture),
            cleanup: None,
            next_run: NextRun::default(),
        }
    }

    pub fn once<F, Fut>(name: &str, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(name, Duration::ZERO, work)
    }

    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Box::new(move || Box::pin(cleanup()) as UnitFuture));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_run(&self) -> Option<SystemTime> {
        self.next_run.get()
    }

    async fn drive(self, mut stop: oneshot::Receiver<()>) {
        let ScheduledTask {
            name,
            interval,
            work,
            cleanup,
            next_run,
        } = self;

        if interval.is_zero() {
            tokio::select! {
                res = work() => {
                    if let Err(e) = res {
                        error!("Unit '{}' failed: {}", name, e);
                    }
                }
                _ = &mut stop => debug!("Unit '{}' cancelled", name),
            }
        } else {
            loop {
                if let Err(e) = work().await {
                    error!("Unit '{}' failed: {}", name, e);
                }
                let next = SystemTime::now() + interval;
                next_run.set(Some(next));
                debug!(
                    "Unit '{}' next run at {} (in {})",
                    name,
                    humantime::format_rfc3339_seconds(next),
                    humantime::format_duration(interval)
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut stop => {
                        debug!("Unit '{}' cancelled", name);
                        next_run.set(None);
                        break;
                    }
                }
            }
        }

        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup().await {
                warn!("Cleanup of unit '{}' failed: {}", name, e);
            }
        }
    }
}

pub struct TaskHandle {
    name: String,
    next_run: NextRun,
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next_run(&self) -> Option<SystemTime> {
        self.next_run.get()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the unit and waits until it and its cleanup are done.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            tx.send(()).ok();
        }
        if let Err(e) = self.join.await {
            error!("Unit '{}' did not stop cleanly: {}", self.name, e);
        }
    }
}

#[derive(Default)]
pub struct Scheduler {
    handles: Vec<TaskHandle>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, task: ScheduledTask) {
        let (tx, rx) = oneshot::channel();
        let name = task.name.clone();
        let next_run = task.next_run.clone();
        info!(
            "Starting unit '{}' ({})",
            name,
            if task.interval.is_zero() {
                "once".to_string()
            } else {
                format!("every {}", humantime::format_duration(task.interval))
            }
        );
        let join = tokio::spawn(task.drive(rx));
        self.handles.push(TaskHandle {
            name,
            next_run,
            stop: Some(tx),
            join,
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name()).collect()
    }

    pub fn handles(&self) -> &[TaskHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn stop_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.stop().await;
        }
    }
}
