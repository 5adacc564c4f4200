//! Outbound Probing
//!
//! The latency strategy measures each candidate by asking an
//! [`OutboundProber`] to push a small request through that outbound. The
//! strategy owns the timing and the timeout; probers only report success.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{LatencyConfig, OutboundConfig, DEFAULT_PROBE_CONTENT, DEFAULT_PROBE_TARGET};
use crate::Result;

/// What a probe should request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// `host:port` to reach through the outbound
    pub destination: String,
    /// Payload written once the connection is up
    pub content: Vec<u8>,
}

impl ProbeTarget {
    pub fn from_config(config: &LatencyConfig) -> Self {
        let destination = if config.probe_target.trim().is_empty() {
            DEFAULT_PROBE_TARGET.to_string()
        } else {
            config.probe_target.clone()
        };
        let content = if config.probe_content.is_empty() {
            DEFAULT_PROBE_CONTENT.as_bytes().to_vec()
        } else {
            config.probe_content.as_bytes().to_vec()
        };
        Self {
            destination,
            content,
        }
    }
}

impl Default for ProbeTarget {
    fn default() -> Self {
        Self::from_config(&LatencyConfig::default())
    }
}

/// Issues a probe through a named outbound
#[async_trait]
pub trait OutboundProber: Send + Sync {
    /// Complete one probe through `outbound_tag`. Errors mark the probe as
    /// failed; they never reach routing callers.
    async fn probe(&self, outbound_tag: &str, target: &ProbeTarget) -> Result<()>;
}

/// Measures TCP connect time to each outbound's own server address.
///
/// Useful when no protocol-aware dialer is wired in: a reachable server is
/// treated as a healthy outbound, and the probe target is not used.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectProber {
    addresses: HashMap<String, SocketAddr>,
}

impl TcpConnectProber {
    pub fn new(addresses: HashMap<String, SocketAddr>) -> Self {
        Self { addresses }
    }

    /// Collect the outbounds that declare an address
    pub fn from_outbounds(outbounds: &[OutboundConfig]) -> Self {
        let addresses = outbounds
            .iter()
            .filter_map(|o| o.address.map(|addr| (o.tag.clone(), addr)))
            .collect();
        Self { addresses }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[async_trait]
impl OutboundProber for TcpConnectProber {
    async fn probe(&self, outbound_tag: &str, _target: &ProbeTarget) -> Result<()> {
        let addr = self
            .addresses
            .get(outbound_tag)
            .ok_or_else(|| anyhow!("no address known for outbound '{}'", outbound_tag))?;

        TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow!("connect to {} failed: {}", addr, e))?;
        debug!("Connect probe to '{}' ({}) succeeded", outbound_tag, addr);
        Ok(())
    }
}
