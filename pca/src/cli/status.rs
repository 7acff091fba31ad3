// pca/src/cli/status.rs
//! Renders pipeline events while an operation runs.
use std::collections::HashMap;
use std::time::Instant;

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pca_common::pipeline::PipelineEvent;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

const BAR_TEMPLATE: &str =
    "{spinner:.blue} {msg:32!} [{bar:28.cyan/blue}] {bytes:>9}/{total_bytes:<9}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Installing,
    Success,
    Failed,
    RolledBack,
}

impl JobStatus {
    fn slot_indicator(&self) -> String {
        match self {
            JobStatus::Installing => " ⚙".magenta().to_string(),
            JobStatus::Success => " ✓".green().bold().to_string(),
            JobStatus::Failed => " ✗".red().bold().to_string(),
            JobStatus::RolledBack => " ↺".yellow().to_string(),
        }
    }
}

struct StatusDisplay {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    jobs: HashMap<String, JobStatus>,
    start_time: Instant,
}

impl StatusDisplay {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            jobs: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    fn line(&self, message: String) {
        if self.multi.println(&message).is_err() {
            println!("{message}");
        }
    }

    fn bar(&mut self, artifact: &str, total_bytes: u64) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(artifact.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(total_bytes));
            if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
                bar.set_style(style.progress_chars("▍▏ "));
            }
            bar.set_message(artifact.to_string());
            bar
        })
    }

    fn job(&mut self, software: &str, status: JobStatus) {
        self.jobs.insert(software.to_string(), status);
        let state = match status {
            JobStatus::Installing => "installing".magenta(),
            JobStatus::Success => "installed".green().bold(),
            JobStatus::Failed => "failed".red().bold(),
            JobStatus::RolledBack => "rolled back".yellow(),
        };
        self.line(format!(
            "{:<14} {} {}",
            state,
            software.cyan(),
            status.slot_indicator()
        ));
    }

    fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::PhaseStarted { phase, artifacts } => {
                self.line(format!(
                    "{} {:?} ({} artifact(s))",
                    "==>".blue().bold(),
                    phase,
                    artifacts
                ));
            }
            PipelineEvent::DownloadStarted {
                artifact,
                total_bytes,
            } => {
                self.bar(&artifact, total_bytes);
            }
            PipelineEvent::DownloadProgress {
                artifact,
                loaded_bytes,
                total_bytes,
            } => {
                let bar = self.bar(&artifact, total_bytes);
                bar.set_length(total_bytes);
                bar.set_position(loaded_bytes);
            }
            PipelineEvent::DownloadFinished {
                artifact,
                size_bytes,
                ..
            } => {
                let bar = self.bar(&artifact, size_bytes);
                bar.set_position(size_bytes);
                bar.finish();
            }
            PipelineEvent::DownloadFailed { artifact, error } => {
                self.bar(&artifact, 0).abandon();
                self.line(format!(
                    "{} {}: {}",
                    "Download failed:".red(),
                    artifact.cyan(),
                    error.red()
                ));
            }
            PipelineEvent::ChecksumVerified { artifact } => {
                debug!("Checksum verified for {}", artifact);
            }
            PipelineEvent::ChecksumFailed { artifact, error }
            | PipelineEvent::UnpackFailed { artifact, error } => {
                self.line(format!("{} {}: {}", "✗".red().bold(), artifact.cyan(), error.red()));
            }
            PipelineEvent::UnpackFinished { artifact, path } => {
                debug!("Unpacked {} into {}", artifact, path.display());
            }
            PipelineEvent::InstallStarted { software, kind } => {
                debug!("Installing {} as {}", software, kind);
                self.job(&software, JobStatus::Installing);
            }
            PipelineEvent::InstallFinished { software } => {
                self.job(&software, JobStatus::Success);
            }
            PipelineEvent::InstallFailed { software, error } => {
                self.job(&software, JobStatus::Failed);
                self.line(format!("  {}", error.red()));
            }
            PipelineEvent::RollbackFinished { software, ok } => {
                if ok {
                    self.job(&software, JobStatus::RolledBack);
                } else {
                    self.line(format!("{} {}", "Rollback failed:".red(), software.cyan()));
                }
            }
            PipelineEvent::LogInfo { message } => self.line(message),
            PipelineEvent::LogWarn { message } => self.line(message.yellow().to_string()),
        }
    }

    fn summary(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        if self.jobs.is_empty() {
            return;
        }
        let count = |wanted: JobStatus| self.jobs.values().filter(|s| **s == wanted).count();
        println!(
            "{}: {}  {}: {}  {}: {}  {}: {:.2}s",
            "Installed".green().bold(),
            count(JobStatus::Success),
            "Failed".red().bold(),
            count(JobStatus::Failed),
            "Rolled back".yellow().bold(),
            count(JobStatus::RolledBack),
            "Elapsed".bold(),
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

/// Event renderer running in the background until `finish` is awaited.
pub struct Progress {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl Progress {
    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.join.await {
            debug!("Progress renderer ended abnormally: {}", e);
        }
    }
}

pub fn follow(event_rx: broadcast::Receiver<PipelineEvent>) -> Progress {
    let (stop, stop_rx) = oneshot::channel();
    let join = tokio::spawn(handle_events(event_rx, stop_rx));
    Progress { stop, join }
}

async fn handle_events(
    mut event_rx: broadcast::Receiver<PipelineEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut display = StatusDisplay::new();
    loop {
        tokio::select! {
            biased;
            event = event_rx.recv() => match event {
                Ok(event) => display.handle(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Progress display skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut stop_rx => break,
        }
    }
    while let Ok(event) = event_rx.try_recv() {
        display.handle(event);
    }
    display.summary();
}
