//! Condition Matchers
//!
//! Atomic predicates over a [`Context`](crate::routing::Context). Each is
//! built once from configuration and is read-only afterwards.

pub mod attribute;
pub mod cidr;
pub mod domain;
pub mod geoip;
pub mod port;

use std::collections::HashSet;

use super::Network;

pub use attribute::{AttrExpr, AttributeMatcher};
pub use cidr::{normalize_cidrs, parse_cidrs, CidrEntry, GeoIpMatcher, IpRangeSet};
pub use domain::{DomainKind, DomainMatcher, DomainPattern};
pub use geoip::{resolve_lists, GeoIpDatabase, GeoIpSource};
pub use port::{PortList, PortRange};

/// Exact membership in a set of strings (users, inbound tags, protocols,
/// applications).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringSetMatcher {
    values: HashSet<String>,
}

impl StringSetMatcher {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// A missing value never matches
    pub fn contains(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| self.values.contains(v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Membership in a set of transport kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMatcher {
    networks: HashSet<Network>,
}

impl NetworkMatcher {
    pub fn new(networks: impl IntoIterator<Item = Network>) -> Self {
        Self {
            networks: networks.into_iter().collect(),
        }
    }

    /// Parse the comma separated form, e.g. `"tcp,udp"`
    pub fn parse(spec: &str) -> Result<Self, crate::error::ConfigError> {
        let networks = spec
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<Network>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(networks))
    }

    pub fn matches(&self, network: Network) -> bool {
        self.networks.contains(&network)
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
