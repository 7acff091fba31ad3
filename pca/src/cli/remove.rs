// pca/src/cli/remove.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::{PcaError, Result};
use tracing::{error, warn};

use super::prompt::{choose_many, confirm};
use super::{status, CommandContext};

/// Roll back installed packages and forget them
#[derive(Args, Debug)]
pub struct Remove {
    /// Package ids to remove (prompted from the installed list when omitted)
    #[arg(short = 'p', long = "package")]
    pub packages: Vec<i64>,

    /// Remove every installed package
    #[arg(long, conflicts_with = "packages")]
    pub all: bool,
}

impl Remove {
    fn targets(&self, ctx: &CommandContext<'_>) -> Result<Vec<i64>> {
        let records = ctx.agent.ledger().records();
        if self.all {
            return Ok(records.iter().map(|r| r.package_id()).collect());
        }
        if !self.packages.is_empty() {
            return Ok(self.packages.clone());
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if !ctx.interactive {
            return Err(PcaError::Generic(
                "packages to remove must be given with -p or --all".to_string(),
            ));
        }
        let labels: Vec<String> = records
            .iter()
            .map(|r| format!("{}. {} ({})", r.index(), r.package.name, r.package_id()))
            .collect();
        let picked = choose_many("packages to remove", &labels)?;
        Ok(picked
            .into_iter()
            .filter_map(|i| records.get(i).map(|r| r.package_id()))
            .collect())
    }

    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let targets = self.targets(ctx)?;
        if targets.is_empty() {
            println!("{}", "Nothing to remove".yellow());
            return Ok(());
        }

        let mut failures = Vec::new();
        for package_id in targets {
            let Some(name) = ctx
                .agent
                .ledger()
                .get(package_id)
                .map(|r| r.package.name.clone())
            else {
                warn!("Package {} is not installed, skip", package_id);
                continue;
            };
            if !confirm(ctx, &format!("Remove {name} ({package_id})?"))? {
                continue;
            }
            let progress = status::follow(ctx.agent.subscribe());
            let outcome = ctx.agent.remove_package(package_id).await;
            progress.finish().await;
            match outcome {
                Ok(true) => println!("{} Removed {}", "✓".green().bold(), name),
                Ok(false) => warn!("Package {} vanished before removal", package_id),
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
}
