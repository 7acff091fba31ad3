// pca/src/cli/update.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::{PcaError, Result};
use pca_common::model::InstalledRecord;
use pca_core::{system, AGENT_VERSION};
use tracing::{error, info, warn};

use super::prompt::confirm;
use super::{status, CommandContext};
use crate::ui;

const AGENT_SERVICE_UNIT: &str = "pca";

/// Install successor packages of installed records, or update the agent itself
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Only update this package id
    #[arg(short = 'p', long = "package", conflicts_with = "index")]
    pub package: Option<i64>,

    /// Only update the package at this list index
    #[arg(short = 'i', long = "index")]
    pub index: Option<usize>,

    /// Update the agent binary
    #[arg(long = "self", conflicts_with_all = ["package", "index"])]
    pub self_update: bool,
}

impl UpdateArgs {
    fn targets(&self, ctx: &CommandContext<'_>) -> Result<Vec<InstalledRecord>> {
        let ledger = ctx.agent.ledger();
        if let Some(id) = self.package {
            let record = ledger
                .get(id)
                .ok_or_else(|| PcaError::NotFound(format!("installed package {id}")))?;
            return Ok(vec![record.clone()]);
        }
        if let Some(index) = self.index {
            let record = ledger
                .get_by_index(index)
                .ok_or_else(|| PcaError::NotFound(format!("installed package #{index}")))?;
            return Ok(vec![record.clone()]);
        }
        Ok(ledger.records().to_vec())
    }

    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        if self.self_update {
            return self.run_self(ctx).await;
        }

        let targets = self.targets(ctx)?;
        if targets.is_empty() {
            println!("{}", "0 packages installed".yellow());
            return Ok(());
        }

        let mut failures = Vec::new();
        for record in targets {
            let spinner = ui::create_spinner(&format!("Checking {}", record.package.name));
            let found = ctx.agent.find_update(&record).await;
            spinner.finish_and_clear();
            let update = match found {
                Ok(Some(update)) => update,
                Ok(None) => {
                    println!("{} is up to date", record.package.name.cyan());
                    continue;
                }
                Err(e) => {
                    error!("Update lookup for {} failed: {}", record.package.name, e);
                    failures.push(e);
                    continue;
                }
            };

            println!(
                "{} {} ({}) -> {} ({})",
                "==>".blue().bold(),
                record.package.name,
                record.package_id(),
                update.name.bold(),
                update.id
            );
            for item in &update.items {
                let previous = record
                    .package
                    .items
                    .iter()
                    .find(|old| old.software.name == item.software.name)
                    .map(|old| old.software.display_version())
                    .unwrap_or_else(|| "new".to_string());
                println!(
                    "  {} {} -> {}",
                    item.software.name.cyan(),
                    previous.dimmed(),
                    item.software.display_version().green()
                );
            }
            if !confirm(ctx, &format!("Update {}?", record.package.name))? {
                continue;
            }

            let progress = status::follow(ctx.agent.subscribe());
            let outcome = ctx.agent.apply_update(record.package_id(), update).await;
            progress.finish().await;
            match outcome {
                Ok(()) => println!("{} Updated {}", "✓".green().bold(), record.package.name),
                Err(e) => {
                    error!("✖ {}", e);
                    failures.push(e);
                }
            }
        }
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    async fn run_self(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let spinner = ui::create_spinner("Checking for agent updates");
        let found = ctx.agent.find_self_update().await;
        spinner.finish_and_clear();
        let Some(release) = found? else {
            println!("pca {} is up to date", AGENT_VERSION);
            return Ok(());
        };
        if !confirm(
            ctx,
            &format!("Update pca {} -> {}?", AGENT_VERSION, release.version),
        )? {
            return Ok(());
        }

        let target = std::env::current_exe()?;
        let version = release.version.clone();
        let progress = status::follow(ctx.agent.subscribe());
        let outcome = ctx.agent.apply_self_update(release, &target).await;
        progress.finish().await;
        outcome?;
        println!("{} pca updated to {}", "✓".green().bold(), version);

        if ctx.interactive {
            if let Err(e) = system::restart_service(AGENT_SERVICE_UNIT).await {
                warn!("Could not restart the {} service: {}", AGENT_SERVICE_UNIT, e);
            }
        } else {
            info!("New agent binary takes effect when the daemon restarts");
        }
        Ok(())
    }
}
