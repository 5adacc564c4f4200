//! Routing Rules
//!
//! A rule pairs a condition chain with a target: either a fixed outbound
//! tag or a balancer that picks one per connection.

use std::sync::Arc;

use super::condition::{Condition, ConditionChain};
use super::matcher::{
    parse_cidrs, resolve_lists, AttributeMatcher, DomainMatcher, GeoIpMatcher,
    GeoIpSource, NetworkMatcher, PortList, StringSetMatcher,
};
use super::Context;
use crate::balancer::Balancer;
use crate::config::RuleConfig;
use crate::error::{ConfigError, RoutingError};

/// Where a matched connection goes
#[derive(Debug, Clone)]
pub enum RuleTarget {
    Outbound(String),
    Balancer(Arc<Balancer>),
}

/// One routing table entry
#[derive(Debug, Clone)]
pub struct Rule {
    tag: Option<String>,
    target: RuleTarget,
    condition: ConditionChain,
}

impl Rule {
    /// Rules without a condition are rejected; they would match everything.
    pub fn new(tag: Option<String>, target: RuleTarget, condition: ConditionChain) -> Result<Self, ConfigError> {
        if condition.is_empty() {
            return Err(ConfigError::EmptyCondition);
        }
        Ok(Self {
            tag,
            target,
            condition,
        })
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn target(&self) -> &RuleTarget {
        &self.target
    }

    pub fn condition(&self) -> &ConditionChain {
        &self.condition
    }

    pub fn apply(&self, ctx: &Context) -> bool {
        self.condition.apply(ctx)
    }

    /// Resolve the outbound for a connection this rule matched
    pub fn outbound_tag(&self) -> Result<String, RoutingError> {
        match &self.target {
            RuleTarget::Outbound(tag) => Ok(tag.clone()),
            RuleTarget::Balancer(balancer) => balancer.pick_outbound(),
        }
    }
}

/// Turn the populated fields of a rule description into an AND-chain.
///
/// Matchers are appended in a fixed order: domain, user, inbound tag, port,
/// network, destination GeoIP/CIDR, source GeoIP/CIDR, custom GeoIP,
/// protocol, attributes, application.
pub fn build_condition(
    config: &RuleConfig,
    geoip: &dyn GeoIpSource,
    custom_geoip: Option<&dyn GeoIpSource>,
) -> Result<ConditionChain, ConfigError> {
    let mut chain = ConditionChain::new();

    if !config.domain.is_empty() {
        chain.add(Condition::Domain(DomainMatcher::from_strings(&config.domain)?));
    }

    if !config.user.is_empty() {
        chain.add(Condition::User(StringSetMatcher::new(config.user.iter().cloned())));
    }

    if !config.inbound_tag.is_empty() {
        chain.add(Condition::InboundTag(StringSetMatcher::new(
            config.inbound_tag.iter().cloned(),
        )));
    }

    if let Some(list) = config.port_list.as_deref().filter(|s| !s.trim().is_empty()) {
        chain.add(Condition::Port(PortList::parse(list)?));
    } else if let Some(range) = config.port_range {
        chain.add(Condition::Port(PortList::new(vec![range])));
    }

    if !config.networks.is_empty() {
        chain.add(Condition::Network(NetworkMatcher::new(config.networks.iter().copied())));
    } else if let Some(network) = config.network.as_deref().filter(|s| !s.trim().is_empty()) {
        chain.add(Condition::Network(NetworkMatcher::parse(network)?));
    }

    if let Some(matcher) = ip_matcher(geoip, &config.geoip, &config.cidr, false)? {
        chain.add(Condition::GeoIp(matcher));
    }

    if let Some(matcher) = ip_matcher(geoip, &config.source_geoip, &config.source_cidr, true)? {
        chain.add(Condition::GeoIp(matcher));
    }

    if !config.custom_geoip.is_empty() {
        let source = custom_geoip
            .ok_or_else(|| ConfigError::MissingCustomGeoIpSource(config.custom_geoip.join(",")))?;
        let lists = resolve_lists(source, &config.custom_geoip)?;
        chain.add(Condition::CustomGeoIp(GeoIpMatcher::new(lists, false)));
    }

    if !config.protocol.is_empty() {
        chain.add(Condition::Protocol(StringSetMatcher::new(config.protocol.iter().cloned())));
    }

    if let Some(expr) = config.attributes.as_deref().filter(|s| !s.trim().is_empty()) {
        chain.add(Condition::Attribute(AttributeMatcher::new(expr)?));
    }

    if !config.application.is_empty() {
        chain.add(Condition::Application(StringSetMatcher::new(
            config.application.iter().cloned(),
        )));
    }

    if chain.is_empty() {
        return Err(ConfigError::EmptyCondition);
    }
    Ok(chain)
}

/// Named lists win over raw CIDRs when both are given
fn ip_matcher(
    geoip: &dyn GeoIpSource,
    names: &[String],
    cidrs: &[String],
    reverse: bool,
) -> Result<Option<GeoIpMatcher>, ConfigError> {
    if !names.is_empty() {
        let lists = resolve_lists(geoip, names)?;
        return Ok(Some(GeoIpMatcher::new(lists, reverse)));
    }
    if !cidrs.is_empty() {
        return Ok(Some(GeoIpMatcher::new(vec![parse_cidrs(cidrs)?], reverse)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::matcher::GeoIpDatabase;
    use crate::routing::{Network, PortRange};
    use std::net::IpAddr;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_condition_order_follows_fields() {
        let config = RuleConfig {
            application: strings(&["curl"]),
            domain: strings(&["domain:example.com"]),
            port_list: Some("443".to_string()),
            networks: vec![Network::Tcp],
            cidr: strings(&["10.0.0.0/8"]),
            source_cidr: strings(&["192.168.0.0/16"]),
            attributes: Some("attrs[':method'] == 'GET'".to_string()),
            user: strings(&["alice"]),
            ..RuleConfig::default()
        };
        let chain = build_condition(&config, &GeoIpDatabase::new(), None).unwrap();
        assert_eq!(
            chain.kinds(),
            vec![
                "domain",
                "user",
                "port",
                "network",
                "geoip",
                "source_geoip",
                "attributes",
                "application"
            ]
        );
    }

    #[test]
    fn test_explicit_lists_take_precedence() {
        let config = RuleConfig {
            port_list: Some("53".to_string()),
            port_range: Some(PortRange::new(1, 65535).unwrap()),
            networks: vec![Network::Udp],
            network: Some("tcp".to_string()),
            ..RuleConfig::default()
        };
        let chain = build_condition(&config, &GeoIpDatabase::new(), None).unwrap();
        assert_eq!(chain.len(), 2);

        let dns = Context::new(Network::Udp).with_target_port(53);
        let other = Context::new(Network::Tcp).with_target_port(80);
        assert!(chain.apply(&dns));
        assert!(!chain.apply(&other));
    }

    #[test]
    fn test_named_geoip_wins_over_cidr() {
        let config = RuleConfig {
            geoip: strings(&["private"]),
            cidr: strings(&["8.8.8.8/32"]),
            ..RuleConfig::default()
        };
        let chain = build_condition(&config, &GeoIpDatabase::new(), None).unwrap();
        let public: IpAddr = "8.8.8.8".parse().unwrap();
        let private: IpAddr = "10.1.2.3".parse().unwrap();
        assert!(!chain.apply(&Context::new(Network::Tcp).with_target_ip(public)));
        assert!(chain.apply(&Context::new(Network::Tcp).with_target_ip(private)));
    }

    #[test]
    fn test_empty_rule_is_rejected() {
        let err = build_condition(&RuleConfig::default(), &GeoIpDatabase::new(), None).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCondition));

        let err = Rule::new(None, RuleTarget::Outbound("direct".to_string()), ConditionChain::new()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCondition));
    }

    #[test]
    fn test_blank_strings_add_no_condition() {
        let blank = RuleConfig {
            port_list: Some(String::new()),
            network: Some("  ".to_string()),
            attributes: Some(String::new()),
            ..RuleConfig::default()
        };
        let err = build_condition(&blank, &GeoIpDatabase::new(), None).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCondition));

        let with_domain = RuleConfig {
            domain: strings(&["full:example.com"]),
            ..blank
        };
        let chain = build_condition(&with_domain, &GeoIpDatabase::new(), None).unwrap();
        assert_eq!(chain.kinds(), vec!["domain"]);
    }

    #[test]
    fn test_custom_geoip_requires_source() {
        let config = RuleConfig {
            custom_geoip: strings(&["corp"]),
            ..RuleConfig::default()
        };
        let err = build_condition(&config, &GeoIpDatabase::new(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCustomGeoIpSource(_)));

        let mut custom = GeoIpDatabase::empty();
        custom.insert("corp", parse_cidrs(&strings(&["172.16.0.0/12"])).unwrap());
        let chain = build_condition(&config, &GeoIpDatabase::new(), Some(&custom)).unwrap();
        assert_eq!(chain.kinds(), vec!["custom_geoip"]);
        let ctx = Context::new(Network::Tcp).with_target_ip("172.20.0.1".parse().unwrap());
        assert!(chain.apply(&ctx));
    }

    #[test]
    fn test_invalid_fields_fail_construction() {
        let bad_regex = RuleConfig {
            domain: strings(&["regexp:("]),
            ..RuleConfig::default()
        };
        assert!(matches!(
            build_condition(&bad_regex, &GeoIpDatabase::new(), None),
            Err(ConfigError::InvalidRegex { .. })
        ));

        let bad_list = RuleConfig {
            geoip: strings(&["nowhere"]),
            ..RuleConfig::default()
        };
        assert!(matches!(
            build_condition(&bad_list, &GeoIpDatabase::new(), None),
            Err(ConfigError::UnknownGeoIpList(_))
        ));
    }
}
