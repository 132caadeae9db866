//! RefreshCoordinator - drives the poll loop against one Zabbix endpoint
//!
//! ## State machine
//!
//! ```text
//! Idle ──tick/RefreshNow──► Fetching ──success──► Ready
//!                              │
//!                              └──failure──► Stale   (previous snapshot kept)
//!                                            Idle    (no snapshot yet)
//! ```
//!
//! At most one fetch is in flight per coordinator: a timer tick that lands
//! while `Fetching` is dropped, and refresh requests collapse onto the
//! running fetch. The fetch itself runs on a spawned task so the command
//! loop stays responsive; snapshot installation and subscriber
//! notification happen back on the actor, preserving single-writer
//! semantics on the snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::Snapshot;
use crate::aggregator;
use crate::client::ZabbixApi;
use crate::error::{ZbxError, ZbxResult};

use super::messages::{CoordinatorCommand, SnapshotEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Fetching,
    Ready,
    Stale,
}

/// Actor that periodically refreshes the snapshot for one endpoint.
pub struct RefreshCoordinator {
    /// Fetch boundary; shared with the spawned fetch tasks.
    api: Arc<dyn ZabbixApi>,

    /// Whether service groups are collected in addition to problems.
    include_services: bool,

    /// Command receiver for control messages.
    command_rx: mpsc::Receiver<CoordinatorCommand>,

    /// Broadcast sender for publishing snapshots.
    snapshot_tx: broadcast::Sender<SnapshotEvent>,

    /// Internal channel returning fetch results to the actor loop.
    fetch_tx: mpsc::Sender<ZbxResult<Snapshot>>,
    fetch_rx: mpsc::Receiver<ZbxResult<Snapshot>>,

    /// Current polling interval.
    interval_duration: Duration,

    phase: Phase,

    /// Last snapshot that completed successfully. Served to subscribers
    /// even while `Stale`.
    last_good: Option<Arc<Snapshot>>,

    /// Refresh requests waiting for the in-flight fetch.
    waiters: Vec<oneshot::Sender<Result<(), ZbxError>>>,
}

impl RefreshCoordinator {
    /// Run the actor's main loop until a Shutdown command arrives.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting refresh coordinator");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Timer tick - start a poll cycle unless one is running
                _ = ticker.tick() => {
                    if self.phase == Phase::Fetching {
                        trace!("tick while a fetch is in flight, dropping");
                    } else {
                        self.start_fetch();
                    }
                }

                // A spawned fetch finished
                Some(result) = self.fetch_rx.recv() => {
                    self.finish_fetch(result);
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CoordinatorCommand::RefreshNow { respond_to } => {
                            self.waiters.push(respond_to);
                            if self.phase == Phase::Fetching {
                                trace!("refresh request collapsed onto in-flight fetch");
                            } else {
                                self.start_fetch();
                            }
                        }

                        CoordinatorCommand::GetSnapshot { respond_to } => {
                            let _ = respond_to.send(self.last_good.clone());
                        }

                        CoordinatorCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs);
                            ticker = interval(self.interval_duration);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }

                        CoordinatorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("refresh coordinator stopped");
    }

    /// Kick off a poll cycle on a separate task so the command loop stays
    /// responsive while the HTTP calls run.
    fn start_fetch(&mut self) {
        self.phase = Phase::Fetching;

        let api = Arc::clone(&self.api);
        let include_services = self.include_services;
        let fetch_tx = self.fetch_tx.clone();

        tokio::spawn(async move {
            let result = aggregator::collect(api.as_ref(), include_services).await;
            // the coordinator may have shut down in the meantime
            let _ = fetch_tx.send(result).await;
        });
    }

    fn finish_fetch(&mut self, result: ZbxResult<Snapshot>) {
        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.last_good = Some(Arc::clone(&snapshot));
                self.phase = Phase::Ready;

                trace!(
                    problems = snapshot.problems.len(),
                    services = snapshot.services.len(),
                    "installed new snapshot"
                );

                if self.snapshot_tx.send(SnapshotEvent { snapshot }).is_err() {
                    trace!("no subscribers for snapshot event");
                }
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                if self.last_good.is_some() {
                    self.phase = Phase::Stale;
                    warn!("poll cycle failed, serving previous snapshot: {e}");
                } else {
                    self.phase = Phase::Idle;
                    error!("poll cycle failed with no snapshot to fall back on: {e}");
                }
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
    }
}

/// Handle for controlling a [`RefreshCoordinator`]
///
/// Can be cloned and shared across tasks.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Spawn a coordinator as a tokio task and return its handle.
    ///
    /// The first interval tick fires immediately, so a fetch starts right
    /// after spawning.
    pub fn spawn(
        api: Arc<dyn ZabbixApi>,
        include_services: bool,
        interval_secs: u64,
        snapshot_tx: broadcast::Sender<SnapshotEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (fetch_tx, fetch_rx) = mpsc::channel(1);

        let actor = RefreshCoordinator {
            api,
            include_services,
            command_rx: cmd_rx,
            snapshot_tx,
            fetch_tx,
            fetch_rx,
            interval_duration: Duration::from_secs(interval_secs),
            phase: Phase::Idle,
            last_good: None,
            waiters: Vec::new(),
        };

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Trigger a poll cycle and wait for its outcome.
    ///
    /// The first call after startup doubles as the initial refresh: an
    /// error here means no snapshot exists at all, and the owner should
    /// treat it as fatal rather than proceed with undefined state.
    pub async fn refresh_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("coordinator dropped the refresh request")??;
        Ok(())
    }

    /// Last good snapshot, if any cycle has succeeded yet.
    pub async fn latest(&self) -> Result<Option<Arc<Snapshot>>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetSnapshot { respond_to: tx })
            .await
            .context("failed to send GetSnapshot command")?;

        rx.await.context("coordinator dropped the snapshot query")
    }

    /// Update the polling interval.
    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Gracefully shut down the coordinator.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
