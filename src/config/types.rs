//! Configuration Types
//!
//! Plain value structs decoded from TOML and handed to the router builder.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::routing::{Network, PortRange};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A statically registered outbound handler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    pub tag: String,
    /// Server address, used as the endpoint of connect probes
    #[serde(default)]
    pub address: Option<SocketAddr>,
}

/// Routing table configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// TOML file with additional named GeoIP lists
    #[serde(default)]
    pub geoip_file: Option<PathBuf>,
    /// Outbound used by the caller when no rule matches
    #[serde(default)]
    pub default_outbound: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub balancers: Vec<BalancerConfig>,
}

/// Rule description. Every populated field contributes one matcher.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Optional rule identifier reported with the routing result
    pub tag: Option<String>,
    pub outbound_tag: Option<String>,
    pub balancer_tag: Option<String>,
    pub domain: Vec<String>,
    pub user: Vec<String>,
    pub inbound_tag: Vec<String>,
    /// `"53,443,1000-2000"`; takes precedence over `port_range`
    pub port_list: Option<String>,
    pub port_range: Option<PortRange>,
    /// Takes precedence over `network`
    pub networks: Vec<Network>,
    /// `"tcp,udp"`
    pub network: Option<String>,
    /// Named lists; take precedence over `cidr`
    pub geoip: Vec<String>,
    pub cidr: Vec<String>,
    pub source_geoip: Vec<String>,
    pub source_cidr: Vec<String>,
    pub custom_geoip: Vec<String>,
    pub protocol: Vec<String>,
    pub attributes: Option<String>,
    pub application: Vec<String>,
}

impl RuleConfig {
    /// Identifier used when attributing errors: the tag or `#index`
    pub fn display_name(&self, index: usize) -> String {
        self.tag.clone().unwrap_or_else(|| format!("#{}", index))
    }
}

/// Balancer selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Random,
    Latency,
}

/// Balancer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    pub tag: String,
    /// Outbound tag prefixes
    pub selectors: Vec<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub latency: LatencyConfig,
}

/// Latency strategy tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Rolling window size
    pub total_measures: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub tolerance: Duration,
    pub probe_target: String,
    pub probe_content: String,
}

pub const DEFAULT_PROBE_TARGET: &str = "www.gstatic.com:80";
pub const DEFAULT_PROBE_CONTENT: &str =
    "HEAD /generate_204 HTTP/1.1\r\nHost: www.gstatic.com\r\nConnection: close\r\n\r\n";

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            total_measures: 5,
            interval: Duration::from_secs(30),
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            tolerance: Duration::ZERO,
            probe_target: DEFAULT_PROBE_TARGET.to_string(),
            probe_content: DEFAULT_PROBE_CONTENT.to_string(),
        }
    }
}
