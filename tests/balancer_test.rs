//! Tests for balancer candidate selection and the random strategy

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{registry, strings};
use rustroute::balancer::{RandomStrategy, StaticOutboundManager};
use rustroute::config::{BalancerConfig, LatencyConfig, StrategyKind};
use rustroute::{Balancer, BalancingStrategy, OutboundManager, RoutingError};

fn random_config(selectors: &[&str]) -> BalancerConfig {
    BalancerConfig {
        tag: "lb".to_string(),
        selectors: strings(selectors),
        strategy: StrategyKind::Random,
        latency: LatencyConfig::default(),
    }
}

#[test]
fn test_random_picks_are_roughly_even() {
    let balancer = Balancer::build(&random_config(&["out-"]), registry(&["out-a", "out-b", "direct"]), None).unwrap();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..10_000 {
        *counts.entry(balancer.pick_outbound().unwrap()).or_default() += 1;
    }

    assert_eq!(counts.len(), 2);
    for tag in ["out-a", "out-b"] {
        let count = counts[tag];
        assert!((4_000..=6_000).contains(&count), "{} picked {} times", tag, count);
    }
}

#[test]
fn test_seeded_strategy_is_reproducible() {
    let candidates = strings(&["a", "b", "c", "d"]);
    let run = |seed| {
        let strategy = RandomStrategy::with_seed(seed);
        (0..50)
            .map(|_| strategy.pick_outbound(&candidates).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(42), run(42));
}

#[test]
fn test_candidates_follow_registry_changes() {
    let outbounds = Arc::new(StaticOutboundManager::new(["direct"]));
    let balancer = Balancer::build(&random_config(&["out-"]), outbounds.clone(), None).unwrap();

    assert!(matches!(
        balancer.pick_outbound(),
        Err(RoutingError::NoCandidates { ref balancer, .. }) if balancer == "lb"
    ));

    outbounds.add("out-z");
    assert_eq!(balancer.pick_outbound().unwrap(), "out-z");

    outbounds.add("out-a");
    assert_eq!(balancer.candidates(), strings(&["out-a", "out-z"]));

    outbounds.remove("out-z");
    outbounds.remove("out-a");
    assert!(balancer.pick_outbound().is_err());
    assert!(outbounds.has_handler("direct"));
}

#[test]
fn test_selector_order_defines_candidate_order() {
    let balancer = Balancer::build(
        &random_config(&["us-", "eu-", "us-east"]),
        registry(&["eu-1", "us-east", "us-west", "asia-1"]),
        None,
    )
    .unwrap();
    assert_eq!(balancer.candidates(), strings(&["us-east", "us-west", "eu-1"]));
}
