//! Configuration file → catalog → reconciled runners

use std::io::Write;

use pulsewatch::{
    actors::MonitorStatus,
    config::{read_config_file, usable_monitors},
};
use tempfile::NamedTempFile;

use crate::helpers::{Engine, TestFactory};

fn write_config(file: &mut NamedTempFile, body: &str) {
    let file = file.as_file_mut();
    file.set_len(0).unwrap();
    std::io::Seek::rewind(file).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.flush().unwrap();
}

const INITIAL: &str = r#"{
    "devices": [{ "id": "core", "address": "10.0.0.1" }],
    "monitors": [
        { "id": 1, "type": "ping", "name": "Gateway", "target": "10.0.0.254" },
        { "id": 2, "type": "bandwidth", "name": "Uplink", "device": "core", "if_index": 3 },
        { "id": 3, "type": "ping", "name": "Broken", "target": "10.0.0.9", "interval": 0 },
        { "id": 4, "type": "events", "name": "Log" },
        { "id": 6, "type": "bandwidth", "name": "Edge", "device": "missing", "if_index": 1 }
    ],
    "storage": { "backend": "none" }
}"#;

const EDITED: &str = r#"{
    "devices": [{ "id": "core", "address": "10.0.0.1" }],
    "monitors": [
        { "id": 1, "type": "ping", "name": "Gateway", "target": "10.0.0.253", "threshold": 20 },
        { "id": 4, "type": "events", "name": "Log" },
        { "id": 5, "type": "ping", "name": "DNS", "target": "1.1.1.1" }
    ],
    "storage": { "backend": "none" }
}"#;

#[tokio::test(start_paused = true)]
async fn test_reloaded_file_reconciles_runners() {
    let mut file = NamedTempFile::new().unwrap();
    write_config(&mut file, INITIAL);
    let path = file.path().to_str().unwrap().to_string();

    let config = read_config_file(&path).unwrap();
    let monitors = usable_monitors(&config);
    assert_eq!(
        monitors.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    let factory = TestFactory::default();
    let engine = Engine::start(factory.clone(), monitors);
    let summary = engine.scheduler.reconcile().await.unwrap();
    assert_eq!(summary.running, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(factory.builds_of(3), 0);

    write_config(&mut file, EDITED);
    let config = read_config_file(&path).unwrap();
    let changes = engine.catalog.replace_all(usable_monitors(&config));
    // bandwidth and broken removed, gateway edited, dns added
    assert_eq!(changes, 4);

    let summary = engine.scheduler.reconcile().await.unwrap();
    assert_eq!(summary.running, 2);
    assert_eq!(summary.rejected, 0);

    let overview = engine.scheduler.list_monitors().await.unwrap();
    let statuses: Vec<_> = overview.iter().map(|m| (m.monitor_id, m.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (1, MonitorStatus::Running),
            (4, MonitorStatus::Passive),
            (5, MonitorStatus::Running),
        ]
    );
    assert_eq!(factory.builds_of(1), 2);
    assert_eq!(factory.builds_of(2), 1);
    assert_eq!(factory.builds_of(5), 1);

    engine.stop().await;
}

#[test]
fn test_legacy_single_target_config() {
    let mut file = NamedTempFile::new().unwrap();
    write_config(
        &mut file,
        r#"{ "destination_ip": "8.8.8.8", "latency_threshold_ms": 50, "ping_interval_seconds": 2 }"#,
    );

    let config = read_config_file(file.path().to_str().unwrap()).unwrap();
    let monitors = usable_monitors(&config);
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].name, "Default Latency");
    assert_eq!(monitors[0].latency_threshold_ms(), 50.0);
    assert_eq!(monitors[0].interval, std::time::Duration::from_secs(2));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = read_config_file(path.to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("absent.json"));
}
