//! Routing Errors
//!
//! Load-time failures abort building the routing table; request-time failures
//! are ordinary results the dispatcher handles (for example with a default
//! outbound).

use thiserror::Error;

/// Errors returned while picking a route for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No rule in the table matched the connection.
    #[error("no matching rule")]
    NoMatchingRule,

    /// A balancer found no live outbound for its selectors.
    #[error("balancer '{balancer}': no live outbound matches selectors {selectors:?}")]
    NoCandidates {
        balancer: String,
        selectors: Vec<String>,
    },

    /// A strategy was asked to choose from nothing.
    #[error("empty candidate set")]
    EmptyCandidateSet,
}

/// Errors raised while building matchers, rules, balancers and the router.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex domain pattern '{pattern}'")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid domain pattern '{0}'")]
    InvalidDomain(String),

    #[error("invalid attribute expression '{expr}': {reason}")]
    InvalidAttributeExpression { expr: String, reason: String },

    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("invalid port specification '{0}'")]
    InvalidPort(String),

    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("unknown GeoIP list '{0}'")]
    UnknownGeoIpList(String),

    #[error("no custom GeoIP source configured for list '{0}'")]
    MissingCustomGeoIpSource(String),

    #[error("this rule has no effective fields")]
    EmptyCondition,

    #[error("rule must set exactly one of outbound_tag or balancer_tag")]
    InvalidTarget,

    #[error("unknown balancer '{0}'")]
    UnknownBalancer(String),

    #[error("duplicate balancer tag '{0}'")]
    DuplicateBalancer(String),

    #[error("balancer has no outbound selectors")]
    EmptySelectors,

    #[error("invalid latency strategy setting: {0}")]
    InvalidLatencySetting(String),

    #[error("latency strategy requires an outbound prober")]
    MissingProber,

    #[error("latency strategy requires a running tokio runtime")]
    NoRuntime,

    #[error("failed to load GeoIP data from '{path}': {reason}")]
    GeoIpData { path: String, reason: String },

    #[error("rule '{rule}' is invalid")]
    Rule {
        rule: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("balancer '{balancer}' is invalid")]
    Balancer {
        balancer: String,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    /// Attribute this error to the rule it was raised for.
    pub fn in_rule(self, rule: impl Into<String>) -> Self {
        ConfigError::Rule {
            rule: rule.into(),
            source: Box::new(self),
        }
    }

    /// Attribute this error to the balancer it was raised for.
    pub fn in_balancer(self, balancer: impl Into<String>) -> Self {
        ConfigError::Balancer {
            balancer: balancer.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping rule/balancer attribution layers.
    pub fn root(&self) -> &ConfigError {
        match self {
            ConfigError::Rule { source, .. } | ConfigError::Balancer { source, .. } => source.root(),
            other => other,
        }
    }
}
