//! Actor-based refresh machinery
//!
//! One coordinator actor runs per configured Zabbix endpoint, driving the
//! poll loop as an independent tokio task. Communication follows three
//! patterns:
//!
//! 1. **Commands**: an mpsc channel per actor for control messages
//! 2. **Events**: successful snapshots are broadcast to every subscriber
//! 3. **Request/Response**: oneshot channels for synchronous queries
//!
//! ```text
//! Timer tick ─► spawn fetch ─► install Snapshot ─► broadcast ─► [sensors, ...]
//!     ▲
//!     └── Commands (RefreshNow, GetSnapshot, UpdateInterval, Shutdown)
//! ```

pub mod coordinator;
pub mod messages;
