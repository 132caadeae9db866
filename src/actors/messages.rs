//! Message types for actor communication

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::Snapshot;
use crate::error::ZbxError;

/// Broadcast to all subscribers after every successful poll cycle.
///
/// Receivers get events in the order they subscribed. The snapshot is
/// shared, never copied: subscribers hold it read-only.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub snapshot: Arc<Snapshot>,
}

/// Commands understood by the refresh coordinator.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Trigger an immediate poll cycle and wait for its outcome.
    ///
    /// Requests arriving while a fetch is already in flight collapse onto
    /// it; every waiter receives the outcome of that one fetch.
    RefreshNow {
        respond_to: oneshot::Sender<Result<(), ZbxError>>,
    },

    /// Read the last good snapshot without forcing a fetch.
    GetSnapshot {
        respond_to: oneshot::Sender<Option<Arc<Snapshot>>>,
    },

    /// Change the polling interval.
    UpdateInterval { interval_secs: u64 },

    /// Stop the poll loop. An in-flight fetch is abandoned; the last good
    /// snapshot is left untouched.
    Shutdown,
}
