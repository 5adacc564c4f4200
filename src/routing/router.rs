//! Connection Router

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::matcher::{GeoIpDatabase, GeoIpSource};
use super::rules::{build_condition, Rule, RuleTarget};
use super::Context;
use crate::balancer::{Balancer, OutboundManager, OutboundProber};
use crate::config::{RoutingConfig, RuleConfig};
use crate::error::{ConfigError, RoutingError};

/// Routing decision for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub outbound_tag: String,
    /// Tag of the rule that matched, if it has one
    pub rule_tag: Option<String>,
}

/// Ordered rule table. Immutable after construction; share it behind an
/// `Arc` and call [`Router::pick_route`] from any number of tasks.
#[derive(Debug, Default)]
pub struct Router {
    rules: Vec<Rule>,
    balancers: HashMap<String, Arc<Balancer>>,
}

impl Router {
    pub fn new(rules: Vec<Rule>, balancers: HashMap<String, Arc<Balancer>>) -> Self {
        Self { rules, balancers }
    }

    pub fn builder(outbounds: Arc<dyn OutboundManager>) -> RouterBuilder {
        RouterBuilder::new(outbounds)
    }

    /// First rule whose condition holds decides the outbound
    pub fn pick_route(&self, ctx: &Context) -> Result<Route, RoutingError> {
        for rule in &self.rules {
            if !rule.apply(ctx) {
                continue;
            }
            let outbound_tag = rule.outbound_tag()?;
            debug!(
                "Rule '{}' matched {}, routing via '{}'",
                rule.tag().unwrap_or("-"),
                ctx.target_display(),
                outbound_tag
            );
            return Ok(Route {
                outbound_tag,
                rule_tag: rule.tag().map(str::to_string),
            });
        }

        debug!("No routing rule matched {}", ctx.target_display());
        Err(RoutingError::NoMatchingRule)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn balancer(&self, tag: &str) -> Option<&Arc<Balancer>> {
        self.balancers.get(tag)
    }

    pub fn balancer_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.balancers.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Stop background work of every balancer in this table
    pub fn shutdown(&self) {
        shutdown_all(&self.balancers);
    }
}

fn shutdown_all(balancers: &HashMap<String, Arc<Balancer>>) {
    for balancer in balancers.values() {
        balancer.shutdown();
    }
}

/// Assembles a [`Router`] from a [`RoutingConfig`].
pub struct RouterBuilder {
    outbounds: Arc<dyn OutboundManager>,
    geoip: Option<Arc<dyn GeoIpSource>>,
    custom_geoip: Option<Arc<dyn GeoIpSource>>,
    prober: Option<Arc<dyn OutboundProber>>,
}

impl RouterBuilder {
    pub fn new(outbounds: Arc<dyn OutboundManager>) -> Self {
        Self {
            outbounds,
            geoip: None,
            custom_geoip: None,
            prober: None,
        }
    }

    /// Source for `geoip`/`source_geoip` names. Without one, the built-in
    /// lists plus `routing.geoip_file` are used.
    pub fn with_geoip(mut self, geoip: Arc<dyn GeoIpSource>) -> Self {
        self.geoip = Some(geoip);
        self
    }

    pub fn with_custom_geoip_source(mut self, source: Arc<dyn GeoIpSource>) -> Self {
        self.custom_geoip = Some(source);
        self
    }

    /// Required by latency balancers
    pub fn with_prober(mut self, prober: Arc<dyn OutboundProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Build the whole table. Any failure aborts the build and stops the
    /// probers of balancers built so far.
    pub fn build(&self, config: &RoutingConfig) -> Result<Router, ConfigError> {
        let geoip = self.geoip_source(config)?;

        let mut balancers: HashMap<String, Arc<Balancer>> = HashMap::new();
        for balancer_config in &config.balancers {
            if balancers.contains_key(&balancer_config.tag) {
                shutdown_all(&balancers);
                return Err(ConfigError::DuplicateBalancer(balancer_config.tag.clone()));
            }
            match Balancer::build(balancer_config, Arc::clone(&self.outbounds), self.prober.clone()) {
                Ok(balancer) => {
                    balancers.insert(balancer_config.tag.clone(), Arc::new(balancer));
                }
                Err(e) => {
                    shutdown_all(&balancers);
                    return Err(e);
                }
            }
        }

        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, rule_config) in config.rules.iter().enumerate() {
            let name = rule_config.display_name(index);
            match self.build_rule(&name, rule_config, geoip.as_ref(), &balancers) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    shutdown_all(&balancers);
                    return Err(e.in_rule(name));
                }
            }
        }

        info!(
            "Routing table built with {} rules and {} balancers",
            rules.len(),
            balancers.len()
        );
        Ok(Router::new(rules, balancers))
    }

    fn geoip_source(&self, config: &RoutingConfig) -> Result<Arc<dyn GeoIpSource>, ConfigError> {
        if let Some(geoip) = &self.geoip {
            return Ok(Arc::clone(geoip));
        }
        let mut database = GeoIpDatabase::new();
        if let Some(path) = &config.geoip_file {
            database.load_from_file(path)?;
        }
        Ok(Arc::new(database))
    }

    fn build_rule(
        &self,
        name: &str,
        config: &RuleConfig,
        geoip: &dyn GeoIpSource,
        balancers: &HashMap<String, Arc<Balancer>>,
    ) -> Result<Rule, ConfigError> {
        let target = match (&config.outbound_tag, &config.balancer_tag) {
            (Some(tag), None) => {
                if !self.outbounds.has_handler(tag) {
                    warn!("Rule '{}' targets outbound '{}' which is not registered", name, tag);
                }
                RuleTarget::Outbound(tag.clone())
            }
            (None, Some(tag)) => {
                let balancer = balancers
                    .get(tag)
                    .ok_or_else(|| ConfigError::UnknownBalancer(tag.clone()))?;
                RuleTarget::Balancer(Arc::clone(balancer))
            }
            _ => return Err(ConfigError::InvalidTarget),
        };

        let condition = build_condition(config, geoip, self.custom_geoip.as_deref())?;
        debug!("Rule '{}' conditions: {:?}", name, condition.kinds());
        Rule::new(config.tag.clone(), target, condition)
    }
}
