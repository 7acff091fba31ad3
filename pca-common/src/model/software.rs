// pca-common/src/model/software.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::BuildArtifact;
use super::installed::InstallationResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SoftwareKind {
    /// Copied as a directory tree under the application folder.
    Application,
    /// Anything else is installed through the OS package manager.
    Package(String),
}

impl From<String> for SoftwareKind {
    fn from(value: String) -> Self {
        if value == "application" {
            SoftwareKind::Application
        } else {
            SoftwareKind::Package(value)
        }
    }
}

impl From<SoftwareKind> for String {
    fn from(value: SoftwareKind) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SoftwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftwareKind::Application => write!(f, "application"),
            SoftwareKind::Package(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hashsum: String,
    /// Local download state, filled in once the HEAD probe succeeds.
    #[serde(default, rename = "file_spec")]
    pub artifact: Option<BuildArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Software {
    pub id: i64,
    pub name: String,
    pub kind: SoftwareKind,
    #[serde(default)]
    pub branch: String,
    pub version: String,
    #[serde(default)]
    pub patch: i64,
    #[serde(default)]
    pub external_key: Option<String>,
    pub build: Build,
    #[serde(default)]
    pub package_info: Option<InstallationResult>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub changelog: Option<String>,
}

impl Software {
    pub fn is_application(&self) -> bool {
        self.kind == SoftwareKind::Application
    }

    /// `<branch>_<version>+<patch>`
    pub fn display_version(&self) -> String {
        format!("{}_{}+{}", self.branch, self.version, self.patch)
    }

    /// Base for download and unpack names.
    pub fn logical_name(&self) -> String {
        format!("{}_{}", self.name, self.display_version())
    }

    pub fn sys_package_name(&self) -> Option<&str> {
        match &self.package_info {
            Some(InstallationResult::System { control, .. }) => Some(&control.name),
            _ => None,
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        match &self.package_info {
            Some(InstallationResult::System {
                service: Some(service),
                ..
            }) => Some(&service.name),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&BuildArtifact> {
        self.build.artifact.as_ref()
    }

    pub fn artifact_mut(&mut self) -> Option<&mut BuildArtifact> {
        self.build.artifact.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_control_plane_payload() {
        let raw = r#"{
            "id": 11, "name": "web ui", "kind": "application", "branch": "main",
            "version": "1.4.0", "patch": 2, "external_key": "webui",
            "build": {"id": 90, "name": "b90", "hashsum": "ff"},
            "gitlab_id": 4, "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let soft: Software = serde_json::from_str(raw).unwrap();
        assert!(soft.is_application());
        assert_eq!(soft.logical_name(), "web ui_main_1.4.0+2");
        assert!(soft.artifact().is_none());
        assert_eq!(
            serde_json::to_value(&soft.kind).unwrap(),
            serde_json::json!("application")
        );
    }

    #[test]
    fn non_application_kind_keeps_its_name() {
        let kind: SoftwareKind = serde_json::from_str("\"service\"").unwrap();
        assert_eq!(kind, SoftwareKind::Package("service".into()));
        assert_eq!(kind.to_string(), "service");
    }
}
