// pca-common/src/model/api.rs
//! Request and response bodies exchanged with the control plane.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub agent_secret: String,
    pub local_address: String,
    pub system: String,
    pub pkg_system: String,
    /// Secrets of every proxy the request passed through, keyed by hop.
    #[serde(default)]
    pub proxy_info: Option<BTreeMap<i64, String>>,
    pub version: String,
    pub local_time_offset: i32,
}

impl RegistrationRequest {
    /// Appends `secret` at the next free hop key.
    pub fn push_proxy_secret(&mut self, secret: &str) {
        let info = self.proxy_info.get_or_insert_with(BTreeMap::new);
        let next = info.keys().next_back().map(|k| k + 1).unwrap_or(0);
        info.insert(next, secret.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Download,
    Installed,
    Fails,
    Upgraded,
    Removed,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::Download => "download",
            NotificationKind::Installed => "installed",
            NotificationKind::Fails => "fails",
            NotificationKind::Upgraded => "upgraded",
            NotificationKind::Removed => "removed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub package_id: i64,
    pub unit_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub context: Option<Map<String, Value>>,
    pub trigger_cmd_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub product: String,
    pub level: String,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

/// On-disk shape of the telemetry buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LogBufferDocument {
    #[serde(default)]
    pub logs: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: i64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareConfig {
    pub path: String,
    pub id: i64,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiErrorDetail {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub class: i64,
    #[serde(default)]
    pub subclass: i64,
    #[serde(default)]
    pub comment: String,
}

/// Error body returned by the control plane on 4xx/5xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: ApiErrorDetail,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(proxy_info: Option<BTreeMap<i64, String>>) -> RegistrationRequest {
        RegistrationRequest {
            agent_secret: "s".into(),
            local_address: "10.0.0.2".into(),
            system: "linux".into(),
            pkg_system: "deb".into(),
            proxy_info,
            version: "0.1.0".into(),
            local_time_offset: 3,
        }
    }

    #[test]
    fn proxy_secret_starts_at_zero() {
        let mut req = request(None);
        req.push_proxy_secret("hop");
        assert_eq!(req.proxy_info.unwrap().get(&0).unwrap(), "hop");
    }

    #[test]
    fn proxy_secret_goes_after_highest_key() {
        let mut existing = BTreeMap::new();
        existing.insert(0, "a".to_string());
        existing.insert(4, "b".to_string());
        let mut req = request(Some(existing));
        req.push_proxy_secret("c");
        let info = req.proxy_info.unwrap();
        assert_eq!(info.get(&5).unwrap(), "c");
        assert_eq!(info.len(), 3);
    }

    #[test]
    fn proxy_info_uses_string_keys_on_the_wire() {
        let raw = r#"{"agent_secret":"s","local_address":"a","system":"linux","pkg_system":"deb",
            "proxy_info":{"2":"x"},"version":"1","local_time_offset":0}"#;
        let req: RegistrationRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.proxy_info.unwrap().get(&2).unwrap(), "x");
    }
}
