// pca/src/cli/reg.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::Result;

use super::CommandContext;
use crate::ui;

/// Register this host with the control plane
#[derive(Args, Debug)]
pub struct Reg {}

impl Reg {
    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let spinner = ui::create_spinner("Registering agent");
        let outcome = ctx.agent.register().await;
        spinner.finish_and_clear();
        outcome?;
        println!("{} Agent registered", "✓".green().bold());
        Ok(())
    }
}
