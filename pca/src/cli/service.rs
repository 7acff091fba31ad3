// pca/src/cli/service.rs
use std::path::Path;

use clap::{Args, Subcommand};
use pca_common::config::Settings;
use pca_common::error::Result;

use crate::daemon;

/// Run the agent daemon
#[derive(Args, Debug)]
pub struct Service {
    #[command(subcommand)]
    pub command: ServiceCommand,
}

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Serve HTTP and RPC and run the scheduled units until SIGINT/SIGTERM
    Serve,
}

impl Service {
    pub async fn run(&self, config_path: &Path, settings: Settings) -> Result<()> {
        match self.command {
            ServiceCommand::Serve => daemon::serve(config_path, settings).await,
        }
    }
}
