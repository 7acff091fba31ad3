// pca/src/cli/list.rs
use clap::Args;
use colored::Colorize;
use pca_common::error::Result;
use pca_common::model::{BuildStatus, InstalledRecord};
use prettytable::{format, Cell, Row, Table};

use super::CommandContext;

/// Show installed packages (`-v` adds system package and service columns)
#[derive(Args, Debug)]
pub struct List {}

impl List {
    pub async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        let records = ctx.agent.ledger().records();
        if records.is_empty() {
            println!("{}", "0 packages installed".yellow());
            return Ok(());
        }
        render(records, ctx.verbose > 0).printstd();
        Ok(())
    }
}

fn status_cell(status: Option<&BuildStatus>) -> Cell {
    match status {
        Some(BuildStatus::Installed) => Cell::new("installed").style_spec("Fg"),
        Some(BuildStatus::Errored(msg)) => Cell::new(&format!("error: {msg}")).style_spec("Fr"),
        Some(other) => Cell::new(&other.to_string().to_lowercase()).style_spec("Fy"),
        None => Cell::new("-"),
    }
}

fn render(records: &[InstalledRecord], detailed: bool) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    let mut header = vec![
        Cell::new("#").style_spec("b"),
        Cell::new("Package").style_spec("b"),
        Cell::new("Software").style_spec("b"),
        Cell::new("Version").style_spec("b"),
        Cell::new("Kind").style_spec("b"),
        Cell::new("Status").style_spec("b"),
    ];
    if detailed {
        header.push(Cell::new("Sys package").style_spec("b"));
        header.push(Cell::new("Service").style_spec("b"));
    }
    table.add_row(Row::new(header));

    for record in records {
        for (i, item) in record.package.items.iter().enumerate() {
            let software = &item.software;
            let (index, package) = if i == 0 {
                (
                    record.index().to_string(),
                    format!("{} ({})", record.package.name, record.package_id()),
                )
            } else {
                (String::new(), String::new())
            };
            let mut cells = vec![
                Cell::new(&index),
                Cell::new(&package),
                Cell::new(&format!("{} ({})", software.name, software.id)),
                Cell::new(&software.display_version()),
                Cell::new(&software.kind.to_string()),
                status_cell(software.artifact().map(|a| &a.status)),
            ];
            if detailed {
                cells.push(Cell::new(software.sys_package_name().unwrap_or("-")));
                cells.push(Cell::new(software.service_name().unwrap_or("-")));
            }
            table.add_row(Row::new(cells));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use pca_common::model::{Build, Client, Package, PackageItem, Product, Software, Unit};

    use super::*;

    fn record(name: &str, softwares: &[&str]) -> InstalledRecord {
        let items = softwares
            .iter()
            .enumerate()
            .map(|(i, soft)| PackageItem {
                install_order: i as i64,
                package_id: 9,
                software: Software {
                    id: i as i64 + 1,
                    name: soft.to_string(),
                    external_key: None,
                    kind: "service".to_string().into(),
                    branch: "main".to_string(),
                    version: "1.0.0".to_string(),
                    patch: 0,
                    build: Build {
                        id: 1,
                        name: String::new(),
                        hashsum: String::new(),
                        artifact: None,
                    },
                    package_info: None,
                    description: String::new(),
                    changelog: None,
                },
                enable: true,
            })
            .collect();
        InstalledRecord {
            client: Client {
                id: 1,
                name: "acme".to_string(),
                description: String::new(),
            },
            product: Product {
                id: 1,
                name: "edge".to_string(),
                description: String::new(),
            },
            unit: Unit {
                id: 1,
                product_id: 1,
                status: String::new(),
                packages: Vec::new(),
            },
            package: Package {
                id: 9,
                name: name.to_string(),
                description: String::new(),
                items,
                inner_index: 1,
                prev_package_id: None,
            },
        }
    }

    #[test]
    fn one_row_per_software_with_package_on_first() {
        let table = render(&[record("edge-core", &["agentd", "collector"])], false);
        // Header plus two software rows.
        assert_eq!(table.len(), 3);
        let first = table.get_row(1).unwrap();
        assert_eq!(first.get_cell(1).unwrap().get_content(), "edge-core (9)");
        let second = table.get_row(2).unwrap();
        assert_eq!(second.get_cell(1).unwrap().get_content(), "");
        assert_eq!(second.get_cell(3).unwrap().get_content(), "main_1.0.0+0");
    }

    #[test]
    fn detailed_table_adds_system_columns() {
        let table = render(&[record("edge-core", &["agentd"])], true);
        assert_eq!(table.get_row(0).unwrap().len(), 8);
        assert_eq!(table.get_row(1).unwrap().get_cell(6).unwrap().get_content(), "-");
    }
}
