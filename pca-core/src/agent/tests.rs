use std::sync::Arc;

use pca_common::config::Settings;
use pca_common::error::PcaError;
use pca_common::model::api::{LogEvent, NotificationKind, SoftwareConfig};
use pca_common::model::{BuildStatus, InstalledRecord, Software};

use super::{parse_lenient_version, Agent, AppUpdate, AppUpdateQuery};
use crate::test_support::{package, record, software, FakeBackendFactory, FakeBuild, FakeControlPlane};

struct Harness {
    home: tempfile::TempDir,
    control: Arc<FakeControlPlane>,
    factory: FakeBackendFactory,
    agent: Agent,
}

async fn harness(factory: FakeBackendFactory) -> Harness {
    let home = tempfile::tempdir().unwrap();
    let settings = Settings::with_home(home.path());
    settings.ensure_dirs().unwrap();
    let control = Arc::new(FakeControlPlane::default());
    let agent = Agent::new(settings, control.clone(), Arc::new(factory.clone()))
        .await
        .unwrap();
    Harness {
        home,
        control,
        factory,
        agent,
    }
}

impl Harness {
    /// Package `id` of applications, each with a served zip build.
    fn app_package(&self, id: i64, name: &str, apps: &[&str]) -> InstalledRecord {
        let items = apps
            .iter()
            .enumerate()
            .map(|(i, app)| {
                let soft_id = id * 100 + i as i64;
                let build_id = soft_id * 10;
                self.control.add_build(
                    build_id,
                    FakeBuild::zip(&[("bin/run", b"#!/bin/sh\n"), ("index.html", app.as_bytes())]),
                );
                (i as i64 + 1, software(soft_id, app, "application", build_id))
            })
            .collect();
        record(package(id, name, items))
    }

    fn ledger_file(&self, name: &str) -> std::path::PathBuf {
        self.agent.settings().info_dir.join(format!("{name}.json"))
    }
}

fn calls_with_prefix(factory: &FakeBackendFactory, prefix: &str) -> Vec<String> {
    factory
        .calls()
        .into_iter()
        .filter(|c| c.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn install_commits_record_with_installed_artifacts() {
    let mut h = harness(FakeBackendFactory::default()).await;
    let rec = h.app_package(1, "web", &["webui", "admin"]);
    h.agent.set_trigger_command(Some(9));
    h.agent.install_package(rec).await.unwrap();

    let stored = h.agent.ledger().get(1).unwrap();
    assert_eq!(stored.index(), 1);
    for item in &stored.package.items {
        let artifact = item.software.artifact().unwrap();
        assert_eq!(artifact.status, BuildStatus::Installed);
        assert!(artifact.valid_checksum);
    }
    assert!(h.ledger_file("web").exists());
    assert!(h.agent.ledger().pending().is_none());

    let notes = h.control.notifications();
    assert_eq!(
        notes.iter().map(|n| n.kind).collect::<Vec<_>>(),
        vec![NotificationKind::Download, NotificationKind::Installed]
    );
    assert!(notes.iter().all(|n| n.trigger_cmd_id == Some(9) && n.unit_id == 3));

    // Downloads and unpacked trees do not outlive the transaction.
    let leftovers = std::fs::read_dir(&h.agent.settings().tmp_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn failing_item_rolls_back_earlier_items_and_leaves_no_record() {
    let mut h = harness(FakeBackendFactory::failing_on("beta")).await;
    let existing = h.app_package(1, "base", &["core"]);
    h.agent.install_package(existing).await.unwrap();

    let rec = h.app_package(2, "suite", &["alpha", "beta", "gamma"]);
    let err = h.agent.install_package(rec).await.unwrap_err();
    assert!(matches!(err, PcaError::InstallerFailed(_)), "{err:?}");

    assert!(h.agent.ledger().get(2).is_none());
    assert!(!h.ledger_file("suite").exists());
    assert!(h.ledger_file("base").exists());
    assert_eq!(h.agent.ledger().records().len(), 1);

    let apps = &h.agent.settings().app_folder;
    let installs = calls_with_prefix(&h.factory, "install:");
    assert!(installs.last().unwrap().ends_with("beta"));
    assert!(!installs.iter().any(|c| c.ends_with("gamma")));
    assert_eq!(
        calls_with_prefix(&h.factory, "rollback:"),
        vec![format!("rollback:{}", apps.join("alpha").display())]
    );

    let fails = h
        .control
        .notifications()
        .into_iter()
        .find(|n| n.kind == NotificationKind::Fails)
        .unwrap();
    assert_eq!(fails.package_id, 2);
    assert!(fails.context.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("beta"));
}

#[tokio::test]
async fn checksum_failure_aborts_before_any_install() {
    let mut h = harness(FakeBackendFactory::default()).await;
    let rec = h.app_package(1, "web", &["webui"]);
    let build_id = rec.package.items[0].software.build.id;
    h.control.add_build(
        build_id,
        FakeBuild::zip(&[("index.html", b"<html/>")]).tampered(),
    );

    let err = h.agent.install_package(rec).await.unwrap_err();
    assert!(matches!(err, PcaError::ChecksumMismatch(_)), "{err:?}");
    assert!(h.factory.calls().is_empty());
    assert!(h.agent.ledger().is_empty());
    assert_eq!(
        h.control.notification_kinds(),
        vec![NotificationKind::Download, NotificationKind::Fails]
    );
}

#[tokio::test]
async fn update_replaces_record_with_successor_package() {
    let mut h = harness(FakeBackendFactory::default()).await;
    h.agent.install_package(h.app_package(1, "web-v1", &["webui"])).await.unwrap();

    let mut disabled = h.app_package(5, "web-disabled", &["webui"]).package;
    disabled.prev_package_id = Some(1);
    disabled.items[0].enable = false;
    h.control.add_update(3, disabled);
    let mut successor = h.app_package(2, "web-v2", &["webui"]).package;
    successor.prev_package_id = Some(1);
    h.control.add_update(3, successor);

    let current = h.agent.ledger().get(1).cloned().unwrap();
    let update = h.agent.find_update(&current).await.unwrap().unwrap();
    assert_eq!(update.id, 2);

    h.agent.apply_update(1, update).await.unwrap();
    assert!(h.agent.ledger().get(1).is_none());
    let replaced = h.agent.ledger().get(2).unwrap();
    assert_eq!(replaced.index(), 1);
    assert!(!h.ledger_file("web-v1").exists());
    assert!(h.ledger_file("web-v2").exists());
}

#[tokio::test]
async fn no_successor_means_no_update() {
    let mut h = harness(FakeBackendFactory::default()).await;
    h.agent.install_package(h.app_package(1, "web", &["webui"])).await.unwrap();
    let current = h.agent.ledger().get(1).cloned().unwrap();
    assert!(h.agent.find_update(&current).await.unwrap().is_none());
}

#[tokio::test]
async fn patch_swaps_one_software_and_reinstalls_it() {
    let mut h = harness(FakeBackendFactory::default()).await;
    h.agent
        .install_package(h.app_package(1, "web", &["webui", "admin"]))
        .await
        .unwrap();
    let installed: Software = h.agent.ledger().get(1).unwrap().package.items[0].software.clone();

    let mut patched = software(installed.id, "webui", "application", 999);
    patched.patch = 1;
    h.control.add_build(999, FakeBuild::zip(&[("index.html", b"patched")]));
    h.control.set_patch(installed.id, patched);

    let latest = h.agent.find_patch(&installed).await.unwrap().unwrap();
    let before = calls_with_prefix(&h.factory, "install:").len();
    h.agent.patch_software(1, installed.id, latest).await.unwrap();
    assert_eq!(calls_with_prefix(&h.factory, "install:").len(), before + 1);

    let item = &h.agent.ledger().get(1).unwrap().package.items[0];
    assert_eq!(item.software.patch, 1);
    assert_eq!(item.software.build.id, 999);
    assert_eq!(item.software.artifact().unwrap().status, BuildStatus::Installed);

    let current = item.software.clone();
    assert!(h.agent.find_patch(&current).await.unwrap().is_none());
}

#[tokio::test]
async fn remove_rolls_back_items_and_reindexes() {
    let mut h = harness(FakeBackendFactory::default()).await;
    h.agent.install_package(h.app_package(1, "first", &["one"])).await.unwrap();
    h.agent.install_package(h.app_package(2, "second", &["two"])).await.unwrap();
    assert_eq!(h.agent.ledger().get(2).unwrap().index(), 2);

    assert!(h.agent.remove_package(1).await.unwrap());
    let apps = &h.agent.settings().app_folder;
    assert_eq!(
        calls_with_prefix(&h.factory, "rollback:"),
        vec![format!("rollback:{}", apps.join("one").display())]
    );
    assert_eq!(h.agent.ledger().get(2).unwrap().index(), 1);
    assert!(!h.ledger_file("first").exists());
    assert_eq!(
        h.control.notification_kinds().last(),
        Some(&NotificationKind::Removed)
    );

    assert!(!h.agent.remove_package(42).await.unwrap());
}

#[tokio::test]
async fn failed_removal_keeps_the_record() {
    let factory = FakeBackendFactory {
        fail_rollback: true,
        ..FakeBackendFactory::default()
    };
    let mut h = harness(factory).await;
    h.agent.install_package(h.app_package(1, "web", &["webui"])).await.unwrap();
    assert!(matches!(
        h.agent.remove_package(1).await,
        Err(PcaError::RollbackFailed(_))
    ));
    assert!(h.agent.ledger().get(1).is_some());
    assert_eq!(
        h.control.notification_kinds().last(),
        Some(&NotificationKind::Fails)
    );
}

#[tokio::test]
async fn non_application_software_receives_remote_config() {
    let mut h = harness(FakeBackendFactory::default()).await;
    let svc = software(10, "collector", "service", 100);
    h.control.add_build(100, FakeBuild::zip(&[("collector.deb", b"deb")]));
    let config_path = h.home.path().join("etc/collector/config.yml");
    h.control.add_config(
        10,
        SoftwareConfig {
            path: config_path.to_string_lossy().into_owned(),
            id: 10,
            raw_data: "level: debug\n".to_string(),
        },
    );

    h.agent
        .install_package(record(package(1, "collector", vec![(1, svc)])))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "level: debug\n");
    let stored = &h.agent.ledger().get(1).unwrap().package.items[0].software;
    assert_eq!(stored.sys_package_name(), Some("collector"));

    std::fs::remove_file(&config_path).unwrap();
    assert!(h.agent.configure_software(10).await.unwrap());
    assert!(config_path.exists());
    assert!(matches!(
        h.agent.configure_software(77).await,
        Err(PcaError::NotFound(_))
    ));
}

#[tokio::test]
async fn application_update_lookup() {
    let mut h = harness(FakeBackendFactory::default()).await;
    h.agent
        .install_package(h.app_package(1, "web", &["webui-main"]))
        .await
        .unwrap();
    let app_dir = h.agent.settings().app_path("webui-main");
    std::fs::create_dir_all(app_dir.join("dist")).unwrap();
    std::fs::write(app_dir.join("dist/bundle.js"), b"js").unwrap();

    let query = |version: &str, patch: i64, key: &str, file: &str| AppUpdateQuery {
        ext_key: key.to_string(),
        file_name: file.to_string(),
        version: version.to_string(),
        patch,
    };
    assert_eq!(
        h.agent.application_update(&query("0.9", 0, "webui", "bundle.js")).unwrap(),
        AppUpdate::Available(app_dir.join("dist/bundle.js"))
    );
    assert_eq!(
        h.agent.application_update(&query("1.0.0", 0, "webui", "bundle.js")).unwrap(),
        AppUpdate::UpToDate
    );
    assert_eq!(
        h.agent.application_update(&query("2", 0, "webui", "bundle.js")).unwrap(),
        AppUpdate::UpToDate
    );
    assert_eq!(
        h.agent.application_update(&query("0.1", 0, "other", "bundle.js")).unwrap(),
        AppUpdate::UnknownKey
    );
    assert_eq!(
        h.agent.application_update(&query("0.1", 0, "webui", "missing.js")).unwrap(),
        AppUpdate::MissingFile
    );
}

#[tokio::test]
async fn logs_are_buffered_until_the_control_plane_accepts_them() {
    let h = harness(FakeBackendFactory::default()).await;
    let event = LogEvent {
        product: "web".into(),
        level: "error".into(),
        context: Some(serde_json::Map::new()),
    };
    h.control.fail_logs(true);
    h.agent.forward_logs(vec![event.clone()]).await.unwrap();
    assert_eq!(h.agent.log_buffer().load().await.unwrap(), vec![event]);

    h.control.fail_logs(false);
    assert_eq!(h.agent.flush_logs().await.unwrap(), 1);
    assert_eq!(h.control.posted_logs().len(), 1);
    assert!(h.agent.log_buffer().load().await.unwrap().is_empty());
}

#[tokio::test]
async fn registration_carries_secret_and_version() {
    let h = harness(FakeBackendFactory::default()).await;
    h.agent.register().await.unwrap();
    let regs = h.control.registrations();
    assert_eq!(regs.len(), 1);
    assert_eq!(regs[0].agent_secret, h.agent.settings().secret);
    assert_eq!(regs[0].version, super::AGENT_VERSION);
    assert!(regs[0].proxy_info.is_none());
}

#[tokio::test]
async fn self_update_replaces_the_target_executable() {
    let h = harness(FakeBackendFactory::default()).await;
    let mut release = software(500, "pca agent", "agent", 5000);
    release.version = "99.0.0".to_string();
    h.control.add_build(5000, FakeBuild::zip(&[("bin/pca", b"#!/bin/sh\necho new\n")]));
    h.control.set_agent_release(release);

    let found = h.agent.find_self_update().await.unwrap().unwrap();
    let target = h.home.path().join("pca");
    std::fs::write(&target, b"old").unwrap();
    h.agent.apply_self_update(found, &target).await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"#!/bin/sh\necho new\n");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
    assert_eq!(
        h.control.notification_kinds(),
        vec![NotificationKind::Upgraded]
    );
}

#[tokio::test]
async fn older_agent_release_is_ignored() {
    let h = harness(FakeBackendFactory::default()).await;
    let mut release = software(500, "pca agent", "agent", 5000);
    release.version = "0.0.1".to_string();
    h.control.set_agent_release(release);
    assert!(h.agent.find_self_update().await.unwrap().is_none());
}

#[test]
fn lenient_versions_are_padded() {
    assert_eq!(parse_lenient_version("1").unwrap(), semver::Version::new(1, 0, 0));
    assert_eq!(parse_lenient_version("v2.3").unwrap(), semver::Version::new(2, 3, 0));
    assert_eq!(
        parse_lenient_version("1.2-rc1").unwrap(),
        semver::Version::parse("1.2.0-rc1").unwrap()
    );
    assert!(parse_lenient_version("one.two").is_err());
}
