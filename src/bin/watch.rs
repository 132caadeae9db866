use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use zbx_evt_sensors::{
    actors::coordinator::CoordinatorHandle,
    client::{ZabbixApi, ZabbixClient},
    config::read_config_file,
    sensors::{SensorSetHandle, build_sensors},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("zbx_evt_sensors", LevelFilter::TRACE),
        ("watch", LevelFilter::TRACE),
    ]);
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
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;
    if let Ok(token) = std::env::var("ZBX_API_TOKEN") {
        config.api_token = token;
    }
    config.validate()?;

    let client = ZabbixClient::login(&config).await?;
    info!("connected to Zabbix {} at {}", client.version(), client.url());

    let (snapshot_tx, _) = broadcast::channel(16);

    // subscribe before the coordinator starts ticking so no snapshot is lost
    let sensor_rx = snapshot_tx.subscribe();
    let mut notify_rx = snapshot_tx.subscribe();

    let coordinator = CoordinatorHandle::spawn(
        Arc::new(client) as Arc<dyn ZabbixApi>,
        config.include_services,
        config.scan_interval,
        snapshot_tx,
    );

    // the first refresh must succeed before any sensors exist; without a
    // snapshot there is nothing meaningful to expose
    coordinator
        .refresh_now()
        .await
        .context("initial refresh failed")?;
    let first = coordinator
        .latest()
        .await?
        .context("no snapshot after initial refresh")?;

    let sensors = build_sensors(&config, &first);
    info!("exposing {} sensors", sensors.len());
    let sensor_set = SensorSetHandle::spawn(sensors, sensor_rx);

    loop {
        tokio::select! {
            event = notify_rx.recv() => {
                match event {
                    Ok(_) => {
                        for reading in sensor_set.readings().await? {
                            info!(
                                "{} = {} ({} events)",
                                reading.entity_id,
                                reading.state,
                                reading.events.len()
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("viewer lagged behind by {n} snapshots");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                debug!("ctrl-c received, shutting down");
                break;
            }
        }
    }

    sensor_set.shutdown().await.ok();
    coordinator.shutdown().await.ok();

    Ok(())
}
