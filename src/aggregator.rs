//! Turns one pair of raw fetches into a tag-grouped [`Snapshot`].
//!
//! ## Algorithm
//!
//! Problems: fetch the raw list, collect every event id, resolve all of
//! them to host names in one batched call, then fan each event out under
//! every `tag:value` key it carries. Services: fetch the raw list, keep
//! root services only, fan out the same way.
//!
//! Fan-out is intentional: an event with N tags appears in N groups. An
//! event with no tags appears in no group at all; by-tag lookup is the
//! only supported access pattern.

use chrono::Utc;
use tracing::{instrument, trace, warn};

use crate::client::ZabbixApi;
use crate::error::ZbxResult;
use crate::{EventScope, Snapshot, TagGroups, ZbxEvent};

/// Host shown for problem events whose id could not be resolved.
pub const UNRESOLVED_HOST: &str = "N/A";

/// Sentinel state for a group with no events.
pub const EMPTY_SEVERITY: i64 = -1;

/// Run one full collection cycle against the API.
///
/// Everything is fetched fresh and regrouped from scratch; nothing carries
/// over from previous cycles.
#[instrument(skip(api))]
pub async fn collect(api: &dyn ZabbixApi, include_services: bool) -> ZbxResult<Snapshot> {
    let problems = collect_problems(api).await?;
    let services = if include_services {
        collect_services(api).await?
    } else {
        TagGroups::new()
    };

    Ok(Snapshot {
        problems,
        services,
        fetched_at: Utc::now(),
    })
}

async fn collect_problems(api: &dyn ZabbixApi) -> ZbxResult<TagGroups> {
    let raw = api.fetch_problems().await?;

    // one batched lookup for the whole cycle, not one call per event
    let event_ids: Vec<String> = raw.iter().map(|p| p.eventid.clone()).collect();
    let hosts = api.resolve_hosts(&event_ids).await?;

    let mut groups = TagGroups::new();
    for problem in raw {
        let host = match hosts.get(&problem.eventid) {
            Some(name) => name.clone(),
            None => {
                warn!("no host resolved for event {}", problem.eventid);
                UNRESOLVED_HOST.to_string()
            }
        };

        let event = ZbxEvent {
            id: problem.eventid,
            name: problem.name,
            severity: parse_ordinal(&problem.severity),
            tags: problem.tags,
            host: Some(host),
            scope: EventScope::Problem,
        };
        fan_out(&mut groups, event);
    }

    trace!("grouped problems under {} tag keys", groups.len());
    Ok(groups)
}

async fn collect_services(api: &dyn ZabbixApi) -> ZbxResult<TagGroups> {
    let raw = api.fetch_services().await?;

    let mut groups = TagGroups::new();
    for service in raw {
        // only root services represent a tree worth surfacing
        if service.parents != "0" {
            continue;
        }

        let event = ZbxEvent {
            id: service.serviceid,
            name: service.description,
            severity: parse_ordinal(&service.status),
            tags: service.tags,
            host: None,
            scope: EventScope::Service,
        };
        fan_out(&mut groups, event);
    }

    trace!("grouped services under {} tag keys", groups.len());
    Ok(groups)
}

/// Append the event under every `tag:value` key it carries. A duplicated
/// identical tag on one event contributes a single bucket entry.
fn fan_out(groups: &mut TagGroups, event: ZbxEvent) {
    let mut seen = std::collections::HashSet::new();
    for tag in &event.tags {
        let key = tag.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        groups.entry(key).or_default().push(event.clone());
    }
}

/// Worst severity in a group, or [`EMPTY_SEVERITY`] when there is none.
/// Max alone decides the representative value; ties are not broken further.
pub fn worst_severity(events: &[ZbxEvent]) -> i64 {
    events
        .iter()
        .map(|e| e.severity)
        .max()
        .unwrap_or(EMPTY_SEVERITY)
}

fn parse_ordinal(raw: &str) -> i64 {
    raw.parse().unwrap_or_else(|_| {
        warn!("unparsable severity {raw:?}, treating as 0");
        0
    })
}
