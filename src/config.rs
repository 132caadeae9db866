use serde::Deserialize;
use tracing::trace;

use crate::error::{ZbxError, ZbxResult};

/// Configuration for one monitored Zabbix endpoint.
///
/// Consumed as provided by the host application; the engine only validates
/// it, it does not manage how it is entered or stored.
#[derive(Debug, Clone, Deserialize)]
pub struct ZbxConfig {
    pub host: String,

    /// API token used as bearer credential. May be supplied via the
    /// `ZBX_API_TOKEN` environment variable instead of the file.
    #[serde(default)]
    pub api_token: String,

    /// Path prefix in front of `api_jsonrpc.php`, empty for most setups.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_use_tls")]
    pub use_tls: bool,

    /// Seconds between poll cycles.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,

    /// Prefix for generated sensor entity ids.
    #[serde(default = "default_sensor_prefix")]
    pub sensor_prefix: String,

    /// Whether to expose service sensors in addition to problem sensors.
    #[serde(default = "default_include_services")]
    pub include_services: bool,

    /// `tag:value` keys to expose as problem sensors, in display order.
    #[serde(default)]
    pub tag_filters: Vec<String>,
}

fn default_port() -> u16 {
    443
}

fn default_use_tls() -> bool {
    true
}

fn default_scan_interval() -> u64 {
    30
}

fn default_sensor_prefix() -> String {
    String::from("zabbix")
}

fn default_include_services() -> bool {
    true
}

impl ZbxConfig {
    /// Full URL of the JSON-RPC endpoint.
    pub fn api_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            format!("{scheme}://{}:{}/api_jsonrpc.php", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}/{path}/api_jsonrpc.php", self.host, self.port)
        }
    }

    /// Fail fast on fields the engine cannot proceed without.
    pub fn validate(&self) -> ZbxResult<()> {
        if self.host.trim().is_empty() {
            return Err(ZbxError::Config("host must not be empty".into()));
        }
        if self.api_token.trim().is_empty() {
            return Err(ZbxError::Config("api_token must not be empty".into()));
        }
        for filter in &self.tag_filters {
            if !filter.contains(':') {
                return Err(ZbxError::Config(format!(
                    "tag filter {filter:?} is not of the form tag:value"
                )));
            }
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<ZbxConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config: &ZbxConfig| trace!("loaded config: {config:?}"))
}
