// pca-common/src/model/package.rs
use serde::{Deserialize, Serialize};

use super::software::Software;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    #[serde(default)]
    pub product_id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub packages: Vec<Package>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageItem {
    pub install_order: i64,
    pub package_id: i64,
    pub software: Software,
    #[serde(default = "enabled_by_default")]
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "packageitems")]
    pub items: Vec<PackageItem>,
    /// Dense 1-based position in the local ledger.
    #[serde(default)]
    pub inner_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_package_id: Option<i64>,
}

impl Package {
    pub fn sort_items(&mut self) {
        self.items.sort_by_key(|item| item.install_order);
    }

    /// True when every item is enabled, which is required for an update candidate.
    pub fn all_enabled(&self) -> bool {
        self.items.iter().all(|item| item.enable)
    }

    pub fn find_software(&self, software_id: i64) -> Option<&PackageItem> {
        self.items.iter().find(|item| item.software.id == software_id)
    }

    pub fn find_software_mut(&mut self, software_id: i64) -> Option<&mut PackageItem> {
        self.items
            .iter_mut()
            .find(|item| item.software.id == software_id)
    }
}
