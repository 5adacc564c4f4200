//! Outbound Balancing
//!
//! A balancer resolves its selector prefixes against the live outbound
//! registry and lets a strategy pick one of the resulting candidates.

pub mod latency;
pub mod outbound;
pub mod probe;
pub mod random;

use std::sync::Arc;

use tracing::debug;

use crate::config::{BalancerConfig, StrategyKind};
use crate::error::{ConfigError, RoutingError};

pub use latency::{HealthRecord, HealthStatus, HealthSummary, LatencySettings, LatencyStrategy};
pub use outbound::{select_outbounds, OutboundManager, StaticOutboundManager};
pub use probe::{OutboundProber, ProbeTarget, TcpConnectProber};
pub use random::RandomStrategy;

/// Picks one outbound tag from a candidate list
pub trait BalancingStrategy: Send + Sync {
    /// Choose a member of `candidates`; an empty list is an error.
    fn pick_outbound(&self, candidates: &[String]) -> Result<String, RoutingError>;

    fn name(&self) -> &'static str;

    /// Stop any background work. Idempotent.
    fn shutdown(&self) {}
}

/// Named group of outbounds behind a strategy
pub struct Balancer {
    tag: String,
    selectors: Vec<String>,
    strategy: Arc<dyn BalancingStrategy>,
    outbounds: Arc<dyn OutboundManager>,
}

impl Balancer {
    pub fn new(
        tag: impl Into<String>,
        selectors: Vec<String>,
        strategy: Arc<dyn BalancingStrategy>,
        outbounds: Arc<dyn OutboundManager>,
    ) -> Self {
        Self {
            tag: tag.into(),
            selectors,
            strategy,
            outbounds,
        }
    }

    /// Build a balancer from configuration. Latency balancers start probing
    /// immediately and need both a prober and a running tokio runtime.
    pub fn build(
        config: &BalancerConfig,
        outbounds: Arc<dyn OutboundManager>,
        prober: Option<Arc<dyn OutboundProber>>,
    ) -> Result<Self, ConfigError> {
        Self::build_inner(config, outbounds, prober).map_err(|e| e.in_balancer(&config.tag))
    }

    fn build_inner(
        config: &BalancerConfig,
        outbounds: Arc<dyn OutboundManager>,
        prober: Option<Arc<dyn OutboundProber>>,
    ) -> Result<Self, ConfigError> {
        if config.selectors.is_empty() {
            return Err(ConfigError::EmptySelectors);
        }

        let strategy: Arc<dyn BalancingStrategy> = match config.strategy {
            StrategyKind::Random => Arc::new(RandomStrategy::new()),
            StrategyKind::Latency => {
                let prober = prober.ok_or(ConfigError::MissingProber)?;
                let settings = LatencySettings::from_config(&config.latency)?;
                Arc::new(LatencyStrategy::spawn(
                    Arc::clone(&outbounds),
                    config.selectors.clone(),
                    prober,
                    settings,
                )?)
            }
        };

        debug!(
            "Built {} balancer '{}' with selectors {:?}",
            strategy.name(),
            config.tag,
            config.selectors
        );
        Ok(Self::new(&config.tag, config.selectors.clone(), strategy, outbounds))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn strategy(&self) -> &Arc<dyn BalancingStrategy> {
        &self.strategy
    }

    /// Live outbounds matching the selectors, in candidate order
    pub fn candidates(&self) -> Vec<String> {
        select_outbounds(self.outbounds.as_ref(), &self.selectors)
    }

    pub fn pick_outbound(&self) -> Result<String, RoutingError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(RoutingError::NoCandidates {
                balancer: self.tag.clone(),
                selectors: self.selectors.clone(),
            });
        }
        let picked = self.strategy.pick_outbound(&candidates)?;
        debug!("Balancer '{}' picked '{}'", self.tag, picked);
        Ok(picked)
    }

    pub fn shutdown(&self) {
        self.strategy.shutdown();
    }
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("tag", &self.tag)
            .field("selectors", &self.selectors)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
