//! Sensor adapter - maps cached tag groups to externally observable state
//!
//! Each sensor represents one `tag:value` group and exposes the worst
//! severity among its members as a numeric state plus the formatted member
//! list as supplementary detail. Sensors recompute only when the
//! coordinator publishes a snapshot; between notifications (including the
//! whole time the coordinator is stale) they freeze at their last known
//! state, so a flapping connection never shows a false all-clear.

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::actors::messages::SnapshotEvent;
use crate::aggregator::{EMPTY_SEVERITY, worst_severity};
use crate::config::ZbxConfig;
use crate::{Snapshot, ZbxEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Problem,
    Service,
}

impl SensorKind {
    fn label(self) -> &'static str {
        match self {
            SensorKind::Problem => "problem",
            SensorKind::Service => "service",
        }
    }
}

/// One externally visible numeric-state object for a tag group.
#[derive(Debug, Clone)]
pub struct TagSensor {
    key: String,
    kind: SensorKind,
    entity_id: String,
    state: i64,
    events: Vec<String>,
}

impl TagSensor {
    pub fn new(kind: SensorKind, key: impl Into<String>, prefix: &str) -> Self {
        let key = key.into();
        let entity_id = format!("{prefix}_{}_{}", kind.label(), slug(&key));

        Self {
            key,
            kind,
            entity_id,
            state: EMPTY_SEVERITY,
            events: Vec::new(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Representative severity: max over the group, or `-1` when empty.
    pub fn state(&self) -> i64 {
        self.state
    }

    /// Member events rendered as `"{host-or-scope}: {name} ({severity})"`.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Recompute from a freshly published snapshot.
    pub fn apply(&mut self, snapshot: &Snapshot) {
        let groups = match self.kind {
            SensorKind::Problem => &snapshot.problems,
            SensorKind::Service => &snapshot.services,
        };

        let members: &[ZbxEvent] = groups.get(&self.key).map(Vec::as_slice).unwrap_or(&[]);
        self.state = worst_severity(members);
        self.events = members.iter().map(ToString::to_string).collect();
    }

    pub fn reading(&self) -> SensorReading {
        SensorReading {
            entity_id: self.entity_id.clone(),
            key: self.key.clone(),
            state: self.state,
            events: self.events.clone(),
        }
    }
}

/// Point-in-time view of one sensor, handed to the host application.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SensorReading {
    pub entity_id: String,
    pub key: String,
    pub state: i64,
    pub events: Vec<String>,
}

fn slug(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the sensor fleet for one endpoint: one problem sensor per
/// configured tag filter, plus one service sensor per service group
/// discovered in the first snapshot.
///
/// Every sensor is seeded from that snapshot so nothing starts out blank.
pub fn build_sensors(config: &ZbxConfig, first: &Snapshot) -> Vec<TagSensor> {
    let mut sensors: Vec<TagSensor> = config
        .tag_filters
        .iter()
        .map(|key| TagSensor::new(SensorKind::Problem, key.clone(), &config.sensor_prefix))
        .collect();

    if config.include_services {
        sensors.extend(
            first
                .services
                .keys()
                .map(|key| TagSensor::new(SensorKind::Service, key.clone(), &config.sensor_prefix)),
        );
    }

    for sensor in &mut sensors {
        sensor.apply(first);
    }
    sensors
}

/// Commands understood by the [`SensorSet`] actor.
#[derive(Debug)]
pub enum SensorCommand {
    /// Read the current state of every sensor.
    GetReadings {
        respond_to: oneshot::Sender<Vec<SensorReading>>,
    },

    /// Stop the sensor loop.
    Shutdown,
}

/// Actor that keeps a fleet of sensors in sync with coordinator snapshots.
pub struct SensorSet {
    sensors: Vec<TagSensor>,
    command_rx: mpsc::Receiver<SensorCommand>,
    snapshot_rx: broadcast::Receiver<SnapshotEvent>,
}

impl SensorSet {
    pub fn new(
        sensors: Vec<TagSensor>,
        command_rx: mpsc::Receiver<SensorCommand>,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
    ) -> Self {
        Self {
            sensors,
            command_rx,
            snapshot_rx,
        }
    }

    /// Run until shutdown or until the snapshot channel closes.
    pub async fn run(mut self) {
        debug!("starting sensor set with {} sensors", self.sensors.len());

        loop {
            tokio::select! {
                // pending snapshots are drained before commands, so a
                // query never observes state older than a published cycle
                biased;

                event = self.snapshot_rx.recv() => {
                    match event {
                        Ok(event) => {
                            for sensor in &mut self.sensors {
                                sensor.apply(&event.snapshot);
                            }
                            trace!("applied snapshot to {} sensors", self.sensors.len());
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // older snapshots are worthless, only the
                            // newest one matters
                            warn!("sensor set lagged behind by {n} snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("snapshot channel closed, stopping sensor set");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SensorCommand::GetReadings { respond_to } => {
                            let readings = self.sensors.iter().map(TagSensor::reading).collect();
                            let _ = respond_to.send(readings);
                        }
                        SensorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("sensor set stopped");
    }
}

/// Handle for querying and controlling a [`SensorSet`]
#[derive(Clone)]
pub struct SensorSetHandle {
    sender: mpsc::Sender<SensorCommand>,
}

impl SensorSetHandle {
    /// Spawn a sensor set as a tokio task and return its handle.
    pub fn spawn(
        sensors: Vec<TagSensor>,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SensorSet::new(sensors, cmd_rx, snapshot_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Current state of every sensor, in registration order.
    pub async fn readings(&self) -> Result<Vec<SensorReading>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SensorCommand::GetReadings { respond_to: tx })
            .await
            .context("failed to send GetReadings command")?;

        rx.await.context("sensor set dropped the readings query")
    }

    /// Gracefully shut down the sensor set.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SensorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
