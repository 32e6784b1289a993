use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pulsewatch::{
    actors::{RunnerSinks, SchedulerHandle, StoreHandle},
    broadcaster::Broadcaster,
    config::{Config, MonitorCatalog, StorageConfig, read_config_file, usable_monitors},
    probes::{DefaultProbeFactory, snmp::SnmpClient},
    storage::{EventBackend, MemoryEventBackend},
    util::get_config_path,
};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Network health monitoring hub")]
struct Args {
    /// Config file (default: $PULSEWATCH_CONFIG or ./pulsewatch.json)
    #[arg(short, long)]
    config: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Query a device over SNMP and list its interfaces
    Discover {
        address: IpAddr,

        #[arg(long, default_value = "public")]
        community: String,

        #[arg(long, default_value_t = 161)]
        port: u16,
    },
}

fn init(verbose: u8) {
    dotenv::dotenv().ok();

    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("pulsewatch", level), ("hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    if let Some(Command::Discover {
        address,
        community,
        port,
    }) = args.command
    {
        return discover(SocketAddr::new(address, port), &community).await;
    }

    let path = args.config.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;

    let storage = config.storage();
    let backend = open_backend(&storage).await?;
    let store =
        StoreHandle::spawn_with_capacity(backend, storage.retention(), storage.max_pending_events());
    let broadcaster = Broadcaster::new(config.runner.subscriber_queue);

    let catalog = Arc::new(MonitorCatalog::new());
    catalog.replace_all(usable_monitors(&config));

    let scheduler = SchedulerHandle::spawn(
        catalog.clone(),
        Arc::new(DefaultProbeFactory),
        RunnerSinks {
            broadcaster: broadcaster.clone(),
            store: store.clone(),
        },
        config.runner.clone(),
    );

    #[cfg(feature = "api")]
    if config.api.enabled {
        use pulsewatch::api::{ApiConfig, ApiState, spawn_api_server};

        let api_config = ApiConfig {
            bind_addr: config.api.bind,
            ..ApiConfig::default()
        };
        let state = ApiState::new(scheduler.clone(), store.clone(), broadcaster.clone());
        spawn_api_server(api_config, state).await?;
    }

    let reload = tokio::spawn(watch_config(path, config, catalog));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    reload.abort();
    if let Err(e) = scheduler.shutdown().await {
        error!("scheduler shutdown failed: {e:#}");
    }
    if let Err(e) = store.flush().await {
        warn!("events still pending at shutdown: {e:#}");
    }
    store.shutdown().await?;

    Ok(())
}

async fn open_backend(storage: &StorageConfig) -> anyhow::Result<Box<dyn EventBackend>> {
    match storage {
        StorageConfig::None => {
            info!("events are kept in memory only");
            Ok(Box::new(MemoryEventBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            info!("storing events in {}", path.display());
            let backend = pulsewatch::storage::sqlite::SqliteEventBackend::new(path)
                .await
                .with_context(|| format!("failed to open event database {}", path.display()))?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

/// Re-reads the config file and hands monitor changes to the catalog
#[instrument(skip(current, catalog))]
async fn watch_config(path: String, mut current: Config, catalog: Arc<MonitorCatalog>) {
    let mut ticker = tokio::time::interval(current.reload_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let config = match read_config_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("keeping previous configuration: {e:#}");
                continue;
            }
        };
        if config == current {
            continue;
        }

        if config.storage != current.storage || config.api != current.api {
            warn!("storage and api settings only take effect after a restart");
        }
        let changes = catalog.replace_all(usable_monitors(&config));
        debug!("configuration reloaded, {changes} monitor changes");
        current = config;
    }
}

async fn discover(target: SocketAddr, community: &str) -> anyhow::Result<()> {
    let client = SnmpClient::new(target, community);

    let description = client
        .validate_connection()
        .await
        .with_context(|| format!("{target} did not answer SNMP requests"))?;
    println!("{target}: {description}");

    let interfaces = client
        .discover_interfaces()
        .await
        .context("failed to walk the interface table")?;
    for interface in interfaces {
        let speed = interface
            .speed
            .map(|bps| format!("{} Mbps", bps / 1_000_000))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<24} {:<32} {speed}",
            interface.if_index, interface.name, interface.alias
        );
    }

    Ok(())
}
