// pca/src/cli/install.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::{PcaError, Result};
use pca_common::model::{InstalledRecord, Package, Unit};
use tracing::{debug, info};

use super::prompt::{choose, confirm};
use super::{status, CommandContext};
use crate::ui;

/// Install a package published for one of this host's units
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Client id (prompted when omitted)
    #[arg(short = 'c', long = "client")]
    pub client: Option<i64>,

    /// Product id (prompted when omitted)
    #[arg(short = 'r', long = "product")]
    pub product: Option<i64>,

    /// Package id (prompted when omitted)
    #[arg(short = 'p', long = "package")]
    pub package: Option<i64>,
}

impl InstallArgs {
    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let control = ctx.agent.control();

        let spinner = ui::create_spinner("Fetching clients");
        let clients = control.clients().await;
        spinner.finish_and_clear();
        let client = choose(ctx, "client", clients?, self.client, |c| c.id, |c| c.name.clone())?;

        let spinner = ui::create_spinner("Fetching products");
        let products = control.products(client.id).await;
        spinner.finish_and_clear();
        let product = choose(ctx, "product", products?, self.product, |p| p.id, |p| p.name.clone())?;

        let spinner = ui::create_spinner("Fetching units");
        let units = control.units(product.id).await;
        spinner.finish_and_clear();
        let candidates = packages_of(units?);
        let (unit, package) = choose(
            ctx,
            "package",
            candidates,
            self.package,
            |(_, p)| p.id,
            |(u, p)| format!("{} [unit {}]", p.name, u.id),
        )?;

        if ctx.agent.ledger().get(package.id).is_some() {
            return Err(PcaError::Generic(format!(
                "package {} is already installed, use `pca update`",
                package.name
            )));
        }

        println!("{} {} ({})", "==>".blue().bold(), package.name.bold(), package.id);
        for item in &package.items {
            println!(
                "  {} {} {}",
                item.install_order,
                item.software.name.cyan(),
                item.software.display_version().dimmed()
            );
        }
        if !confirm(ctx, &format!("Install {}?", package.name))? {
            info!("Install of {} cancelled", package.name);
            return Ok(());
        }

        let record = InstalledRecord {
            client,
            product,
            unit,
            package,
        };
        let name = record.package.name.clone();
        let progress = status::follow(ctx.agent.subscribe());
        let outcome = ctx.agent.install_package(record).await;
        progress.finish().await;
        outcome?;
        println!("{} Installed {}", "✓".green().bold(), name);
        Ok(())
    }
}

/// Every package of every unit, paired with its unit stripped of the package list.
fn packages_of(units: Vec<Unit>) -> Vec<(Unit, Package)> {
    let mut pairs = Vec::new();
    for mut unit in units {
        let packages = std::mem::take(&mut unit.packages);
        debug!("Unit {} offers {} package(s)", unit.id, packages.len());
        pairs.extend(packages.into_iter().map(|p| (unit.clone(), p)));
    }
    pairs
}
