use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::actors::event_store::{DEFAULT_MAX_PENDING_EVENTS, Retention};
use crate::{MonitorId, MonitorKind};

pub const DEFAULT_PING_THRESHOLD_MS: f64 = 5.0;

const MAX_RETENTION_DAYS: u32 = 36_500;
const MAX_CLEANUP_INTERVAL_HOURS: u64 = 24 * 365;

const LEGACY_MONITOR_ID: MonitorId = 1;
const LEGACY_MONITOR_NAME: &str = "Default Latency";

/// A monitor definition that cannot be run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("monitor {id} is invalid: {reason}")]
    Invalid { id: MonitorId, reason: String },

    #[error("monitor {0} is defined more than once")]
    DuplicateId(MonitorId),
}

impl ConfigError {
    fn invalid(id: MonitorId, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            id,
            reason: reason.into(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory event log (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Events older than this are pruned
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u64,

        /// Events kept in memory while the database is unavailable
        #[serde(default = "default_max_pending_events")]
        max_pending_events: usize,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            max_pending_events: default_max_pending_events(),
        }
    }
}

impl StorageConfig {
    /// Rejects retention settings the event store cannot schedule
    pub fn validate(&self) -> anyhow::Result<()> {
        let StorageConfig::Sqlite {
            retention_days,
            cleanup_interval_hours,
            max_pending_events,
            ..
        } = self
        else {
            return Ok(());
        };

        anyhow::ensure!(
            (1..=MAX_RETENTION_DAYS).contains(retention_days),
            "retention_days must be between 1 and {MAX_RETENTION_DAYS}, got {retention_days}"
        );
        anyhow::ensure!(
            (1..=MAX_CLEANUP_INTERVAL_HOURS).contains(cleanup_interval_hours),
            "cleanup_interval_hours must be between 1 and {MAX_CLEANUP_INTERVAL_HOURS}, got {cleanup_interval_hours}"
        );
        anyhow::ensure!(*max_pending_events > 0, "max_pending_events must be positive");
        Ok(())
    }

    pub fn retention(&self) -> Option<Retention> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite {
                retention_days,
                cleanup_interval_hours,
                ..
            } => Some(Retention {
                days: *retention_days,
                cleanup_interval: Duration::from_secs(cleanup_interval_hours.saturating_mul(3600)),
            }),
        }
    }

    pub fn max_pending_events(&self) -> usize {
        match self {
            StorageConfig::None => DEFAULT_MAX_PENDING_EVENTS,
            StorageConfig::Sqlite {
                max_pending_events, ..
            } => *max_pending_events,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./events.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_max_pending_events() -> usize {
    DEFAULT_MAX_PENDING_EVENTS
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "crate::util::get_bind_addr")]
    pub bind: SocketAddr,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            bind: crate::util::get_bind_addr(),
        }
    }
}

fn default_api_enabled() -> bool {
    true
}

/// Tuning knobs shared by all monitor runners
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct RunnerSettings {
    /// Consecutive executor crashes after which a runner faults
    #[serde(default = "default_max_consecutive_crashes")]
    pub max_consecutive_crashes: u32,

    /// Consecutive probe failures after which a monitor is reported unavailable
    #[serde(default = "default_unavailable_after")]
    pub unavailable_after: u32,

    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Per-subscriber queue length of the live feed
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    /// Period of the scheduler's safety-net reconciliation pass
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl RunnerSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_crashes: default_max_consecutive_crashes(),
            unavailable_after: default_unavailable_after(),
            stop_grace_ms: default_stop_grace_ms(),
            subscriber_queue: default_subscriber_queue(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_max_consecutive_crashes() -> u32 {
    3
}

fn default_unavailable_after() -> u32 {
    3
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_subscriber_queue() -> usize {
    64
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_reload_interval_secs() -> u64 {
    5
}

/// SNMP-capable network device referenced by bandwidth monitors
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: Option<String>,
    pub address: IpAddr,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

/// Monitor as written in the configuration file
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct MonitorEntry {
    pub id: MonitorId,
    #[serde(rename = "type")]
    pub kind: MonitorKind,
    pub name: String,
    /// Host to ping
    pub target: Option<String>,
    /// Device id of a bandwidth monitor
    pub device: Option<String>,
    pub if_index: Option<u32>,
    /// Seconds between probes
    pub interval: Option<f64>,
    /// Latency threshold in ms (ping) or Mbps (bandwidth)
    pub threshold: Option<f64>,
}

impl MonitorEntry {
    /// Turns the file representation into a runnable definition, resolving
    /// device references.
    pub fn resolve(
        &self,
        devices: &HashMap<&str, &DeviceConfig>,
    ) -> Result<MonitorConfig, ConfigError> {
        let target = match self.kind {
            MonitorKind::Ping => {
                let raw = self
                    .target
                    .as_deref()
                    .ok_or_else(|| ConfigError::invalid(self.id, "ping monitor without target"))?;
                let address = raw.trim().parse::<IpAddr>().map_err(|_| {
                    ConfigError::invalid(self.id, format!("'{raw}' is not an IP address"))
                })?;
                Some(Target::Host { address })
            }
            MonitorKind::Bandwidth => {
                let device_id = self.device.as_deref().ok_or_else(|| {
                    ConfigError::invalid(self.id, "bandwidth monitor without device")
                })?;
                let device = devices.get(device_id).ok_or_else(|| {
                    ConfigError::invalid(self.id, format!("unknown device '{device_id}'"))
                })?;
                let if_index = self.if_index.ok_or_else(|| {
                    ConfigError::invalid(self.id, "bandwidth monitor without if_index")
                })?;
                Some(Target::Interface {
                    device: DeviceRef::from(*device),
                    if_index,
                })
            }
            MonitorKind::Events => None,
        };

        let seconds = self.interval.unwrap_or(match self.kind {
            MonitorKind::Bandwidth => 5.0,
            _ => 1.0,
        });
        let interval = Duration::try_from_secs_f64(seconds)
            .map_err(|_| ConfigError::invalid(self.id, format!("invalid interval {seconds}")))?;

        let threshold = match self.kind {
            MonitorKind::Ping => Some(self.threshold.unwrap_or(DEFAULT_PING_THRESHOLD_MS)),
            _ => self.threshold,
        };

        Ok(MonitorConfig {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            target,
            interval,
            threshold,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    pub id: String,
    pub address: IpAddr,
    pub port: u16,
    pub community: String,
}

impl DeviceRef {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<&DeviceConfig> for DeviceRef {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            id: device.id.clone(),
            address: device.address,
            port: device.port,
            community: device.community.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host { address: IpAddr },
    Interface { device: DeviceRef, if_index: u32 },
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Host { address } => write!(f, "{address}"),
            Target::Interface { device, if_index } => {
                write!(f, "{}/{} (ifIndex {if_index})", device.id, device.address)
            }
        }
    }
}

/// Validated, immutable monitor definition
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub id: MonitorId,
    pub kind: MonitorKind,
    pub name: String,
    pub target: Option<Target>,
    pub interval: Duration,
    /// Latency in ms for ping monitors, throughput in Mbps for bandwidth monitors
    pub threshold: Option<f64>,
}

impl MonitorConfig {
    pub fn ping(id: MonitorId, name: &str, address: IpAddr, interval: Duration) -> Self {
        Self {
            id,
            kind: MonitorKind::Ping,
            name: name.to_string(),
            target: Some(Target::Host { address }),
            interval,
            threshold: Some(DEFAULT_PING_THRESHOLD_MS),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn latency_threshold_ms(&self) -> f64 {
        self.threshold.unwrap_or(DEFAULT_PING_THRESHOLD_MS)
    }

    /// Checks everything a runner relies on. A monitor failing this check is
    /// never started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(self.id, "empty name"));
        }
        if self.kind == MonitorKind::Events {
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err(ConfigError::invalid(self.id, "interval must be positive"));
        }
        if let Some(threshold) = self.threshold
            && (!threshold.is_finite() || threshold < 0.0)
        {
            return Err(ConfigError::invalid(
                self.id,
                format!("invalid threshold {threshold}"),
            ));
        }
        match (self.kind, &self.target) {
            (MonitorKind::Ping, Some(Target::Host { .. })) => Ok(()),
            (MonitorKind::Bandwidth, Some(Target::Interface { .. })) => Ok(()),
            (kind, target) => Err(ConfigError::invalid(
                self.id,
                format!("{kind} monitor cannot probe {target:?}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub runner: RunnerSettings,

    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,

    // Single-target settings of older configuration files
    pub destination_ip: Option<IpAddr>,
    pub latency_threshold_ms: Option<f64>,
    pub ping_interval_seconds: Option<f64>,
}

impl Config {
    /// Resolves every monitor entry. Invalid entries are reported and left
    /// out.
    pub fn monitor_configs(&self) -> (Vec<MonitorConfig>, Vec<ConfigError>) {
        let devices: HashMap<&str, &DeviceConfig> = self
            .devices
            .iter()
            .map(|device| (device.id.as_str(), device))
            .collect();

        let mut configs: Vec<MonitorConfig> = Vec::with_capacity(self.monitors.len());
        let mut errors = Vec::new();

        for entry in &self.monitors {
            if configs.iter().any(|config| config.id == entry.id) {
                errors.push(ConfigError::DuplicateId(entry.id));
                continue;
            }
            match entry.resolve(&devices) {
                Ok(config) => configs.push(config),
                Err(err) => errors.push(err),
            }
        }

        if configs.is_empty()
            && errors.is_empty()
            && let Some(legacy) = self.legacy_monitor()
        {
            debug!("migrating legacy single-target settings");
            configs.push(legacy);
        }

        (configs, errors)
    }

    /// The "Default Latency" monitor synthesised from single-target settings
    fn legacy_monitor(&self) -> Option<MonitorConfig> {
        let address = self.destination_ip?;
        let interval = self
            .ping_interval_seconds
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .unwrap_or(Duration::from_secs(1));

        Some(
            MonitorConfig::ping(LEGACY_MONITOR_ID, LEGACY_MONITOR_NAME, address, interval)
                .with_threshold(
                    self.latency_threshold_ms
                        .unwrap_or(DEFAULT_PING_THRESHOLD_MS),
                ),
        )
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file '{path}'"))?;
    let config: Config = serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file '{path}'"))?;
    config
        .storage()
        .validate()
        .with_context(|| format!("invalid storage settings in '{path}'"))?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

/// A change to the set of configured monitors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    Upsert(MonitorConfig),
    Remove(MonitorId),
}

/// In-process source of truth for monitor definitions
///
/// Every mutation is announced on a broadcast channel so that the scheduler
/// can reconcile without polling. Subscribers that fall behind receive a
/// `Lagged` error and are expected to resync from `list_monitor_configs`.
#[derive(Debug)]
pub struct MonitorCatalog {
    monitors: RwLock<BTreeMap<MonitorId, MonitorConfig>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl Default for MonitorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorCatalog {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            monitors: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    pub fn list_monitor_configs(&self) -> Vec<MonitorConfig> {
        self.monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: MonitorId) -> Option<MonitorConfig> {
        self.monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Adds or replaces a monitor. Returns `false` if nothing changed.
    pub fn upsert(&self, config: MonitorConfig) -> bool {
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        if monitors.get(&config.id) == Some(&config) {
            return false;
        }
        monitors.insert(config.id, config.clone());
        self.notify(ConfigChange::Upsert(config));
        true
    }

    pub fn remove(&self, id: MonitorId) -> bool {
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        if monitors.remove(&id).is_none() {
            return false;
        }
        self.notify(ConfigChange::Remove(id));
        true
    }

    /// Replaces the whole catalog, announcing only the differences.
    /// Returns the number of changes.
    pub fn replace_all(&self, configs: Vec<MonitorConfig>) -> usize {
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        let incoming: BTreeMap<MonitorId, MonitorConfig> = configs
            .into_iter()
            .map(|config| (config.id, config))
            .collect();

        let removed: Vec<MonitorId> = monitors
            .keys()
            .filter(|id| !incoming.contains_key(id))
            .copied()
            .collect();
        let mut changes = removed.len();
        for id in removed {
            monitors.remove(&id);
            self.notify(ConfigChange::Remove(id));
        }

        for (id, config) in incoming {
            if monitors.get(&id) != Some(&config) {
                monitors.insert(id, config.clone());
                self.notify(ConfigChange::Upsert(config));
                changes += 1;
            }
        }

        changes
    }

    fn notify(&self, change: ConfigChange) {
        // no receivers is fine, the scheduler may not be running yet
        if self.changes.send(change).is_err() {
            trace!("configuration change without subscribers");
        }
    }
}

/// Logs rejected monitor entries and returns the usable ones
pub fn usable_monitors(config: &Config) -> Vec<MonitorConfig> {
    let (monitors, errors) = config.monitor_configs();
    for err in errors {
        warn!("skipping monitor: {err}");
    }
    monitors
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "devices": [
            { "id": "core", "address": "10.0.0.1", "community": "secret" }
        ],
        "monitors": [
            { "id": 1, "type": "ping", "name": "Gateway", "target": "10.0.0.254" },
            { "id": 2, "type": "bandwidth", "name": "Uplink", "device": "core",
              "if_index": 3, "threshold": 100 },
            { "id": 3, "type": "events", "name": "Log" }
        ],
        "storage": { "backend": "none" }
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        let (monitors, errors) = config.monitor_configs();
        assert!(errors.is_empty());
        assert_eq!(monitors.len(), 3);

        assert_eq!(
            monitors[0],
            MonitorConfig::ping(
                1,
                "Gateway",
                "10.0.0.254".parse().unwrap(),
                Duration::from_secs(1)
            )
        );

        assert_eq!(monitors[1].interval, Duration::from_secs(5));
        assert_eq!(monitors[1].threshold, Some(100.0));
        assert_matches!(
            &monitors[1].target,
            Some(Target::Interface { device, if_index: 3 }) if device.community == "secret" && device.port == 161
        );
        assert_eq!(monitors[2].target, None);
        assert_eq!(config.storage(), StorageConfig::None);
        assert_eq!(config.runner, RunnerSettings::default());
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let config: Config = serde_json::from_str(
            r#"{ "monitors": [
                { "id": 7, "type": "bandwidth", "name": "x", "device": "nope", "if_index": 1 }
            ] }"#,
        )
        .unwrap();
        let (monitors, errors) = config.monitor_configs();
        assert!(monitors.is_empty());
        assert_matches!(&errors[..], [ConfigError::Invalid { id: 7, .. }]);
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let config: Config = serde_json::from_str(
            r#"{ "monitors": [
                { "id": 1, "type": "ping", "name": "x", "target": "1.1.1.1", "interval": -1 }
            ] }"#,
        )
        .unwrap();
        let (_, errors) = config.monitor_configs();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let config: Config = serde_json::from_str(
            r#"{ "monitors": [
                { "id": 1, "type": "ping", "name": "a", "target": "1.1.1.1" },
                { "id": 1, "type": "ping", "name": "b", "target": "1.0.0.1" }
            ] }"#,
        )
        .unwrap();
        let (monitors, errors) = config.monitor_configs();
        assert_eq!(monitors.len(), 1);
        assert_eq!(errors, vec![ConfigError::DuplicateId(1)]);
    }

    #[test]
    fn test_legacy_settings_become_default_monitor() {
        let config: Config = serde_json::from_str(
            r#"{ "destination_ip": "8.8.8.8", "latency_threshold_ms": 20, "ping_interval_seconds": 2 }"#,
        )
        .unwrap();
        let (monitors, _) = config.monitor_configs();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].name, "Default Latency");
        assert_eq!(monitors[0].threshold, Some(20.0));
        assert_eq!(monitors[0].interval, Duration::from_secs(2));
    }

    #[test]
    fn test_validate() {
        let ping = MonitorConfig::ping(1, "a", "1.1.1.1".parse().unwrap(), Duration::from_secs(1));
        assert_eq!(ping.validate(), Ok(()));

        let zero = MonitorConfig {
            interval: Duration::ZERO,
            ..ping.clone()
        };
        assert_matches!(zero.validate(), Err(ConfigError::Invalid { id: 1, .. }));

        let nan = ping.clone().with_threshold(f64::NAN);
        assert!(nan.validate().is_err());

        let mismatch = MonitorConfig {
            kind: MonitorKind::Bandwidth,
            ..ping
        };
        assert!(mismatch.validate().is_err());
    }

    #[test]
    fn test_storage_settings_are_bounded() {
        let parse = |json: &str| serde_json::from_str::<StorageConfig>(json).unwrap();

        let defaults = parse(r#"{ "backend": "sqlite" }"#);
        assert!(defaults.validate().is_ok());
        assert_eq!(
            defaults.retention(),
            Some(Retention {
                days: 30,
                cleanup_interval: Duration::from_secs(24 * 3600),
            })
        );

        for json in [
            r#"{ "backend": "sqlite", "cleanup_interval_hours": 0 }"#,
            r#"{ "backend": "sqlite", "cleanup_interval_hours": 18446744073709551615 }"#,
            r#"{ "backend": "sqlite", "retention_days": 0 }"#,
            r#"{ "backend": "sqlite", "retention_days": 4294967295 }"#,
            r#"{ "backend": "sqlite", "max_pending_events": 0 }"#,
        ] {
            assert!(parse(json).validate().is_err(), "{json} accepted");
        }

        let huge = parse(r#"{ "backend": "sqlite", "cleanup_interval_hours": 18446744073709551615 }"#);
        assert_matches!(huge.retention(), Some(Retention { cleanup_interval, .. }) if cleanup_interval == Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_zero_cleanup_interval_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{ "storage": { "backend": "sqlite", "cleanup_interval_hours": 0 } }"#,
        )
        .unwrap();

        let err = read_config_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("cleanup_interval_hours"));
    }

    #[test]
    fn test_catalog_replace_all_reports_differences() {
        let catalog = MonitorCatalog::new();
        let mut changes = catalog.subscribe();
        let a = MonitorConfig::ping(1, "a", "1.1.1.1".parse().unwrap(), Duration::from_secs(1));
        let b = MonitorConfig::ping(2, "b", "1.0.0.1".parse().unwrap(), Duration::from_secs(1));

        assert_eq!(catalog.replace_all(vec![a.clone(), b.clone()]), 2);
        assert_eq!(catalog.replace_all(vec![a.clone(), b.clone()]), 0);

        let b2 = b.clone().with_threshold(50.0);
        assert_eq!(catalog.replace_all(vec![b2.clone()]), 2);

        assert_eq!(changes.try_recv().unwrap(), ConfigChange::Upsert(a));
        assert_eq!(changes.try_recv().unwrap(), ConfigChange::Upsert(b));
        assert_eq!(changes.try_recv().unwrap(), ConfigChange::Remove(1));
        assert_eq!(changes.try_recv().unwrap(), ConfigChange::Upsert(b2.clone()));
        assert!(changes.try_recv().is_err());

        assert_eq!(catalog.list_monitor_configs(), vec![b2]);
    }

    #[test]
    fn test_catalog_upsert_and_remove() {
        let catalog = MonitorCatalog::new();
        let a = MonitorConfig::ping(1, "a", "1.1.1.1".parse().unwrap(), Duration::from_secs(1));
        assert!(catalog.upsert(a.clone()));
        assert!(!catalog.upsert(a));
        assert!(catalog.get(1).is_some());
        assert!(catalog.remove(1));
        assert!(!catalog.remove(1));
        assert!(catalog.get(1).is_none());
    }
}
