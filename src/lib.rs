pub mod actors;
pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod sensors;

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A `key:value` label attached to a problem or service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    pub value: String,
}

impl Tag {
    /// The grouping key this tag contributes, e.g. `"env:prod"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tag, self.value)
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Problem,
    Service,
}

/// One alert or service-health record from a single poll cycle.
///
/// `severity` is the raw integer reported by the API. Problem events carry
/// trigger severities (0..=5), service events carry service status codes.
/// The two scales share this one axis without normalization, matching the
/// upstream API; consumers that mix both kinds must interpret accordingly.
///
/// Events are built once per cycle and replaced wholesale on the next
/// refresh; nothing mutates them in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZbxEvent {
    pub id: String,
    pub name: String,
    pub severity: i64,
    pub tags: Vec<Tag>,
    /// Resolved host name for problem events, `None` for service events.
    pub host: Option<String>,
    pub scope: EventScope,
}

impl ZbxEvent {
    /// Host name for problems, the literal `service` for service events.
    pub fn host_or_scope(&self) -> &str {
        self.host.as_deref().unwrap_or("service")
    }
}

// Equality is by (id, host, name, severity); tags do not participate.
impl PartialEq for ZbxEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.host == other.host
            && self.name == other.name
            && self.severity == other.severity
    }
}

impl Eq for ZbxEvent {}

impl fmt::Display for ZbxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.host_or_scope(), self.name, self.severity)
    }
}

/// Events grouped by `tag:value` key, in discovery order from the API
/// response. Rebuilt from scratch on every cycle.
pub type TagGroups = IndexMap<String, Vec<ZbxEvent>>;

/// The immutable result of one complete poll cycle.
///
/// Owned by the refresh coordinator and handed out as `Arc<Snapshot>`;
/// a new snapshot atomically replaces the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub problems: TagGroups,
    pub services: TagGroups,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Compare group contents, ignoring when they were fetched.
    pub fn same_groups(&self, other: &Self) -> bool {
        self.problems == other.problems && self.services == other.services
    }
}
