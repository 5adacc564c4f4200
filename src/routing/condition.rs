//! Rule Conditions
//!
//! A closed set of matcher variants plus an ordered AND-chain.

use super::matcher::{
    AttributeMatcher, DomainMatcher, GeoIpMatcher, NetworkMatcher, PortList, StringSetMatcher,
};
use super::Context;

/// Boolean predicate over a connection context
#[derive(Debug, Clone)]
pub enum Condition {
    Domain(DomainMatcher),
    User(StringSetMatcher),
    InboundTag(StringSetMatcher),
    Port(PortList),
    Network(NetworkMatcher),
    /// Bundled GeoIP lists or raw CIDRs, destination or source side
    GeoIp(GeoIpMatcher),
    /// Lists resolved through an externally supplied source
    CustomGeoIp(GeoIpMatcher),
    Protocol(StringSetMatcher),
    Attribute(AttributeMatcher),
    Application(StringSetMatcher),
    Chain(ConditionChain),
}

impl Condition {
    pub fn apply(&self, ctx: &Context) -> bool {
        match self {
            Condition::Domain(m) => ctx.target_domain.as_deref().is_some_and(|d| m.matches(d)),
            Condition::User(m) => m.contains(ctx.user.as_deref()),
            Condition::InboundTag(m) => m.contains(ctx.inbound_tag.as_deref()),
            Condition::Port(list) => ctx.target_port.is_some_and(|p| list.contains(p)),
            Condition::Network(m) => m.matches(ctx.network),
            Condition::GeoIp(m) | Condition::CustomGeoIp(m) => m.apply(ctx),
            Condition::Protocol(m) => m.contains(ctx.protocol.as_deref()),
            Condition::Attribute(m) => m.matches(&ctx.attributes),
            Condition::Application(m) => m.contains(ctx.application.as_deref()),
            Condition::Chain(chain) => chain.apply(ctx),
        }
    }

    /// Short variant name, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Domain(_) => "domain",
            Condition::User(_) => "user",
            Condition::InboundTag(_) => "inbound_tag",
            Condition::Port(_) => "port",
            Condition::Network(_) => "network",
            Condition::GeoIp(m) if m.is_reverse() => "source_geoip",
            Condition::GeoIp(_) => "geoip",
            Condition::CustomGeoIp(_) => "custom_geoip",
            Condition::Protocol(_) => "protocol",
            Condition::Attribute(_) => "attributes",
            Condition::Application(_) => "application",
            Condition::Chain(_) => "chain",
        }
    }
}

/// Conditions joined by AND, evaluated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConditionChain {
    conditions: Vec<Condition>,
}

impl ConditionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.conditions.iter().map(Condition::kind).collect()
    }

    /// Short-circuits on the first unsatisfied member. An empty chain never
    /// matches.
    pub fn apply(&self, ctx: &Context) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.apply(ctx))
    }
}
