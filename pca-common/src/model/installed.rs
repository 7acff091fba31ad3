// pca-common/src/model/installed.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::package::{Client, Package, Product, Unit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PackageControlInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
}

impl ServiceInfo {
    /// Unit name without the `.service` suffix.
    pub fn unit_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutorunInfo {
    pub path: PathBuf,
}

/// What a backend left on the host after installing a software unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallationResult {
    System {
        control: PackageControlInfo,
        #[serde(default)]
        service: Option<ServiceInfo>,
        #[serde(default)]
        autorun: Option<AutorunInfo>,
    },
    Application {
        path: PathBuf,
    },
}

/// One ledger entry: a package as installed on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub client: Client,
    pub product: Product,
    pub unit: Unit,
    pub package: Package,
}

impl InstalledRecord {
    pub fn file_name(&self) -> String {
        format!("{}.json", self.package.name)
    }

    pub fn package_id(&self) -> i64 {
        self.package.id
    }

    pub fn index(&self) -> usize {
        self.package.inner_index
    }
}
