// pca/src/cli/soft.rs
use clap::{Args, Subcommand};
use colored::Colorize;
use pca_common::error::Result;

use super::CommandContext;

/// Manage installed software
#[derive(Args, Debug)]
pub struct Soft {
    #[command(subcommand)]
    pub command: SoftCommand,
}

#[derive(Subcommand, Debug)]
pub enum SoftCommand {
    /// Re-fetch and apply the remote configuration of a software
    Config {
        #[arg(short = 's', long = "software")]
        software: i64,
    },
}

impl Soft {
    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        match self.command {
            SoftCommand::Config { software } => {
                if ctx.agent.configure_software(software).await? {
                    println!("{} Configuration applied to {}", "✓".green().bold(), software);
                } else {
                    println!("No remote configuration for software {}", software);
                }
                Ok(())
            }
        }
    }
}
