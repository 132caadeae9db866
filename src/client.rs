//! Zabbix JSON-RPC client adapter
//!
//! Wraps the remote monitoring API behind the [`ZabbixApi`] trait so the
//! aggregator and coordinator never see HTTP. The real implementation
//! ([`ZabbixClient`]) speaks JSON-RPC 2.0 over reqwest with a bearer token;
//! tests substitute in-memory fakes.
//!
//! ## Calls
//!
//! - `apiinfo.version` - unauthenticated handshake at login
//! - `problem.get`     - active alerts with their tags
//! - `service.get`     - service tree nodes with parent counts and tags
//! - `event.get`       - one batched event-id → host-name resolution

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::Tag;
use crate::config::ZbxConfig;
use crate::error::{ZbxError, ZbxResult};

/// Timeout for a single API call. A hung Zabbix server must not wedge the
/// refresh loop, so every request is bounded.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw problem record as returned by `problem.get`.
///
/// Zabbix serializes numbers as strings on the wire; parsing happens in
/// the aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProblem {
    pub eventid: String,
    pub name: String,
    pub severity: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Raw service record as returned by `service.get` with
/// `selectParents: "count"`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawService {
    pub serviceid: String,
    pub description: String,
    pub status: String,
    /// Parent count as a string; `"0"` marks a root service.
    #[serde(default = "zero_count")]
    pub parents: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn zero_count() -> String {
    String::from("0")
}

#[derive(Debug, Deserialize)]
struct RawEventHosts {
    eventid: String,
    #[serde(default)]
    hosts: Vec<HostRef>,
}

#[derive(Debug, Deserialize)]
struct HostRef {
    name: String,
}

/// Fetch boundary against the monitoring API.
///
/// All calls look blocking from the caller's perspective; offloading them
/// so the scheduler stays responsive is the coordinator's job.
#[async_trait]
pub trait ZabbixApi: Send + Sync {
    /// Current problems with severity, name and tags.
    async fn fetch_problems(&self) -> ZbxResult<Vec<RawProblem>>;

    /// Service tree nodes; callers filter down to root services.
    async fn fetch_services(&self) -> ZbxResult<Vec<RawService>>;

    /// One batched event-id → host-name lookup, never a call per event.
    async fn resolve_hosts(&self, event_ids: &[String]) -> ZbxResult<HashMap<String, String>>;
}

/// Live client for one Zabbix endpoint.
pub struct ZabbixClient {
    client: reqwest::Client,
    url: String,
    token: String,
    version: String,
}

// manual impl so the bearer token never ends up in logs
impl fmt::Debug for ZabbixClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZabbixClient")
            .field("url", &self.url)
            .field("version", &self.version)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ZabbixClient {
    /// Open a session against the configured endpoint.
    ///
    /// Performs an `apiinfo.version` handshake so connectivity problems
    /// surface at setup time instead of on the first poll. The token is
    /// only exercised by authenticated calls, so a bad one shows up as
    /// [`ZbxError::Auth`] on the first fetch.
    pub async fn login(config: &ZbxConfig) -> ZbxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ZbxError::Connect(e.to_string()))?;

        let mut zbx = Self {
            client,
            url: config.api_url(),
            token: config.api_token.clone(),
            version: String::new(),
        };

        let version = zbx.rpc("apiinfo.version", json!([])).await?;
        zbx.version = version.as_str().unwrap_or_default().to_string();
        debug!("connected to Zabbix {} at {}", zbx.version, zbx.url);

        Ok(zbx)
    }

    /// Server version reported during the login handshake.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One JSON-RPC round trip.
    ///
    /// Transport failures map to [`ZbxError::Connect`], API-level auth
    /// rejections to [`ZbxError::Auth`], everything else unexpected to
    /// [`ZbxError::Protocol`].
    async fn rpc(&self, rpc_method: &str, params: Value) -> ZbxResult<Value> {
        trace!("calling {rpc_method}");

        let mut request = self.client.post(&self.url).json(&json!({
            "jsonrpc": "2.0",
            "method": rpc_method,
            "params": params,
            "id": 1,
        }));

        // apiinfo.version must be called without credentials
        if rpc_method != "apiinfo.version" {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ZbxError::Connect(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ZbxError::Protocol(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown API error");
            let data = error.get("data").and_then(Value::as_str).unwrap_or_default();
            let detail = format!("{message} {data}").trim().to_string();

            if is_auth_rejection(&detail) {
                return Err(ZbxError::Auth(detail));
            }
            return Err(ZbxError::Protocol(detail));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ZbxError::Protocol(format!("{rpc_method} returned no result")))
    }
}

fn is_auth_rejection(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("not authorized")
        || lower.contains("authentication")
        || lower.contains("re-login")
        || lower.contains("api token")
        || lower.contains("session terminated")
}

#[async_trait]
impl ZabbixApi for ZabbixClient {
    async fn fetch_problems(&self) -> ZbxResult<Vec<RawProblem>> {
        let result = self
            .rpc(
                "problem.get",
                json!({
                    "output": ["eventid", "severity", "name"],
                    "selectTags": ["tag", "value"],
                }),
            )
            .await?;

        serde_json::from_value(result).map_err(|e| ZbxError::Protocol(format!("problem.get: {e}")))
    }

    async fn fetch_services(&self) -> ZbxResult<Vec<RawService>> {
        let result = self
            .rpc(
                "service.get",
                json!({
                    "output": ["serviceid", "status", "description"],
                    "selectParents": "count",
                    "selectTags": "extend",
                }),
            )
            .await?;

        serde_json::from_value(result).map_err(|e| ZbxError::Protocol(format!("service.get: {e}")))
    }

    async fn resolve_hosts(&self, event_ids: &[String]) -> ZbxResult<HashMap<String, String>> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let result = self
            .rpc(
                "event.get",
                json!({
                    "eventids": event_ids,
                    "output": ["eventid"],
                    "selectHosts": ["name"],
                }),
            )
            .await?;

        let events: Vec<RawEventHosts> = serde_json::from_value(result)
            .map_err(|e| ZbxError::Protocol(format!("event.get: {e}")))?;

        // events without any host entry simply stay unresolved
        Ok(events
            .into_iter()
            .filter_map(|e| e.hosts.into_iter().next().map(|h| (e.eventid, h.name)))
            .collect())
    }
}
