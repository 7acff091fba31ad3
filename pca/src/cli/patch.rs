// pca/src/cli/patch.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::{PcaError, Result};
use tracing::error;

use super::prompt::confirm;
use super::{status, CommandContext};
use crate::ui;

/// Apply the latest patch of installed software
#[derive(Args, Debug)]
pub struct Patch {
    /// Only patch this software id
    #[arg(short = 's', long = "software")]
    pub software: Option<i64>,
}

impl Patch {
    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let candidates: Vec<(i64, String, pca_common::model::Software)> = ctx
            .agent
            .ledger()
            .records()
            .iter()
            .flat_map(|r| {
                r.package
                    .items
                    .iter()
                    .map(move |item| (r.package_id(), r.package.name.clone(), item.software.clone()))
            })
            .filter(|(_, _, software)| self.software.map_or(true, |id| software.id == id))
            .collect();
        if let (Some(id), true) = (self.software, candidates.is_empty()) {
            return Err(PcaError::NotFound(format!("installed software {id}")));
        }

        let mut failures = Vec::new();
        let mut patched_any = false;
        for (package_id, package_name, installed) in candidates {
            let spinner = ui::create_spinner(&format!("Checking {}", installed.name));
            let found = ctx.agent.find_patch(&installed).await;
            spinner.finish_and_clear();
            let patched = match found {
                Ok(Some(patched)) => patched,
                Ok(None) => continue,
                Err(e) => {
                    error!("Patch lookup for {} failed: {}", installed.name, e);
                    failures.push(e);
                    continue;
                }
            };

            println!(
                "{} {} in {}: {} -> {}",
                "==>".blue().bold(),
                installed.name.cyan(),
                package_name,
                installed.display_version().dimmed(),
                patched.display_version().green()
            );
            if !confirm(ctx, &format!("Patch {}?", installed.name))? {
                continue;
            }
            patched_any = true;
            let progress = status::follow(ctx.agent.subscribe());
            let outcome = ctx
                .agent
                .patch_software(package_id, installed.id, patched)
                .await;
            progress.finish().await;
            match outcome {
                Ok(()) => println!("{} Patched {}", "✓".green().bold(), installed.name),
                Err(e) => {
                    error!("✖ {}", e);
                    failures.push(e);
                }
            }
        }
        if !patched_any && failures.is_empty() {
            println!("{}", "No patches available".yellow());
        }
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}
