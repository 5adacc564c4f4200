//! Routing Context
//!
//! The per-connection facts matchers are evaluated against.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Transport kind of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Udp,
    Unix,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "udp" => Ok(Network::Udp),
            "unix" => Ok(Network::Unix),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
            Network::Unix => "unix",
        };
        f.write_str(name)
    }
}

/// Read-only view of a connection handed to the router.
///
/// Built by the dispatcher once per connection and never mutated while rules
/// are evaluated.
#[derive(Debug, Clone)]
pub struct Context {
    pub network: Network,
    pub source_ip: Option<IpAddr>,
    pub source_port: Option<u16>,
    /// Destination addresses (the literal target IP and/or resolved addresses)
    pub target_ips: Vec<IpAddr>,
    /// Destination domain, either requested or sniffed
    pub target_domain: Option<String>,
    pub target_port: Option<u16>,
    pub inbound_tag: Option<String>,
    /// Authenticated user identity (e.g. an email)
    pub user: Option<String>,
    /// Sniffed application-layer protocol
    pub protocol: Option<String>,
    /// Sniffed application identifier
    pub application: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Context {
    /// Create an empty context for the given transport
    pub fn new(network: Network) -> Self {
        Self {
            network,
            source_ip: None,
            source_port: None,
            target_ips: Vec::new(),
            target_domain: None,
            target_port: None,
            inbound_tag: None,
            user: None,
            protocol: None,
            application: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_source(mut self, ip: IpAddr, port: u16) -> Self {
        self.source_ip = Some(ip);
        self.source_port = Some(port);
        self
    }

    pub fn with_target_ip(mut self, ip: IpAddr) -> Self {
        self.target_ips.push(ip);
        self
    }

    pub fn with_target_domain(mut self, domain: impl Into<String>) -> Self {
        self.target_domain = Some(domain.into());
        self
    }

    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }

    pub fn with_inbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.inbound_tag = Some(tag.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Source address as a slice, for matchers that test the reverse direction
    pub fn source_ips(&self) -> &[IpAddr] {
        self.source_ip.as_ref().map(std::slice::from_ref).unwrap_or(&[])
    }

    /// Short human-readable destination for logs
    pub fn target_display(&self) -> String {
        let host = match (&self.target_domain, self.target_ips.first()) {
            (Some(domain), _) => domain.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => "<unknown>".to_string(),
        };
        match self.target_port {
            Some(port) => format!("{}:{} ({})", host, port, self.network),
            None => format!("{} ({})", host, self.network),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_network_parsing() {
        assert_eq!("TCP".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!(" udp ".parse::<Network>().unwrap(), Network::Udp);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(ConfigError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn test_context_builder() {
        let ctx = Context::new(Network::Udp)
            .with_source(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 5353)
            .with_target_domain("example.com")
            .with_target_port(53)
            .with_attribute(":method", "GET");

        assert_eq!(ctx.source_ips(), &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))]);
        assert_eq!(ctx.target_display(), "example.com:53 (udp)");
        assert_eq!(ctx.attributes.get(":method").map(String::as_str), Some("GET"));
        assert!(Context::new(Network::Tcp).source_ips().is_empty());
    }
}
