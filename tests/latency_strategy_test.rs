//! Tests for the latency balancing strategy and its background prober

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{registry, strings, MockProber};
use rustroute::balancer::{BalancingStrategy, HealthStatus, LatencySettings, LatencyStrategy};
use rustroute::config::{BalancerConfig, LatencyConfig, RoutingConfig, RuleConfig, StrategyKind};
use rustroute::{Balancer, ConfigError, Context, Network, RouterBuilder, RouterService};

fn settings(total_measures: usize, tolerance: Duration) -> LatencySettings {
    LatencySettings {
        total_measures,
        tolerance,
        ..LatencySettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_fast_outbound_wins_after_one_cycle() {
    let outbounds = registry(&["fast", "slow"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("fast", Duration::from_millis(10))
            .with_delay("slow", Duration::from_millis(500)),
    );
    let strategy = LatencyStrategy::new(outbounds, strings(&[""]), prober, settings(5, Duration::ZERO));

    assert_eq!(strategy.probe_all().await, 2);

    let fast = strategy.health_record("fast").unwrap();
    assert_eq!(fast.status(), HealthStatus::Healthy);
    assert_eq!(fast.score(), Some(Duration::from_millis(10)));

    let candidates = strings(&["slow", "fast"]);
    for _ in 0..1000 {
        assert_eq!(strategy.pick_outbound(&candidates).unwrap(), "fast");
    }
}

#[tokio::test(start_paused = true)]
async fn test_tolerance_keeps_earlier_candidate() {
    let outbounds = registry(&["a", "b"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("a", Duration::from_millis(120))
            .with_delay("b", Duration::from_millis(100)),
    );
    let strategy = LatencyStrategy::new(outbounds, strings(&[""]), prober, settings(5, Duration::from_millis(50)));
    strategy.probe_all().await;

    assert_eq!(strategy.pick_outbound(&strings(&["a", "b"])).unwrap(), "a");
    assert_eq!(strategy.pick_outbound(&strings(&["b", "a"])).unwrap(), "b");
}

#[tokio::test(start_paused = true)]
async fn test_all_failing_still_returns_candidate() {
    let outbounds = registry(&["a", "b"]);
    let prober = Arc::new(MockProber::new().with_failure("a").with_failure("b"));
    let strategy = LatencyStrategy::new(outbounds, strings(&[""]), prober, settings(5, Duration::ZERO));
    strategy.probe_all().await;

    let summary = strategy.health_summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.unhealthy, 2);

    let candidates = strings(&["a", "b"]);
    for _ in 0..100 {
        let pick = strategy.pick_outbound(&candidates).unwrap();
        assert!(candidates.contains(&pick));
    }
}

#[tokio::test(start_paused = true)]
async fn test_probe_timeout_counts_as_failure() {
    let outbounds = registry(&["stuck", "ok"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("stuck", Duration::from_secs(60))
            .with_delay("ok", Duration::from_millis(300)),
    );
    let strategy = LatencyStrategy::new(outbounds, strings(&[""]), prober, settings(5, Duration::ZERO));
    strategy.probe_all().await;

    let stuck = strategy.health_record("stuck").unwrap();
    assert_eq!(stuck.status(), HealthStatus::Unhealthy);
    assert_eq!(stuck.score(), None);
    assert_eq!(strategy.pick_outbound(&strings(&["stuck", "ok"])).unwrap(), "ok");
}

#[tokio::test(start_paused = true)]
async fn test_background_prober_follows_delay_and_interval() {
    let outbounds = registry(&["fast", "slow"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("fast", Duration::from_millis(10))
            .with_delay("slow", Duration::from_millis(500)),
    );
    let strategy = LatencyStrategy::spawn(
        outbounds,
        strings(&[""]),
        prober.clone(),
        settings(5, Duration::ZERO),
    )
    .unwrap();
    assert!(strategy.is_running());

    // Default delay is 1s, interval 30s
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(prober.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(prober.calls(), 2);
    assert_eq!(strategy.health_record("fast").unwrap().samples().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(prober.calls(), 4);
    assert_eq!(strategy.health_record("slow").unwrap().samples().len(), 2);
    assert_eq!(strategy.pick_outbound(&strings(&["slow", "fast"])).unwrap(), "fast");

    strategy.shutdown();
    strategy.stopped().await;
    assert!(!strategy.is_running());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(prober.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_strategy_stops_prober() {
    let outbounds = registry(&["a"]);
    let prober = Arc::new(MockProber::new().with_delay("a", Duration::from_millis(10)));
    let strategy = LatencyStrategy::spawn(outbounds, strings(&["a"]), prober.clone(), settings(5, Duration::ZERO)).unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let calls = prober.calls();
    assert_eq!(calls, 1);

    drop(strategy);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(prober.calls(), calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_picks_during_probing() {
    let outbounds = registry(&["a", "b", "c"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("a", Duration::from_micros(200))
            .with_delay("b", Duration::from_micros(400)),
    );
    let settings = LatencySettings {
        total_measures: 3,
        interval: Duration::from_millis(1),
        delay: Duration::ZERO,
        ..LatencySettings::default()
    };
    let strategy = Arc::new(LatencyStrategy::spawn(outbounds, strings(&[""]), prober, settings).unwrap());
    let candidates = Arc::new(strings(&["a", "b", "c"]));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let strategy = Arc::clone(&strategy);
        let candidates = Arc::clone(&candidates);
        handles.push(tokio::spawn(async move {
            for i in 0..2000 {
                let pick = strategy.pick_outbound(&candidates).unwrap();
                assert!(candidates.contains(&pick));
                for record in strategy.health_snapshot() {
                    assert!(record.samples().len() <= 3);
                    assert_eq!(record.score().is_some(), !record.samples().is_empty());
                }
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for _ in 0..5 {
        strategy.probe_all().await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    strategy.shutdown();
    strategy.stopped().await;
}

#[tokio::test(start_paused = true)]
async fn test_router_with_latency_balancer() {
    let outbounds = registry(&["direct", "out-fast", "out-slow"]);
    let prober = Arc::new(
        MockProber::new()
            .with_delay("out-fast", Duration::from_millis(10))
            .with_delay("out-slow", Duration::from_millis(500)),
    );
    let config = RoutingConfig {
        rules: vec![RuleConfig {
            tag: Some("all".to_string()),
            balancer_tag: Some("lb".to_string()),
            network: Some("tcp,udp".to_string()),
            ..RuleConfig::default()
        }],
        balancers: vec![BalancerConfig {
            tag: "lb".to_string(),
            selectors: strings(&["out-"]),
            strategy: StrategyKind::Latency,
            latency: LatencyConfig::default(),
        }],
        ..RoutingConfig::default()
    };

    let router = RouterBuilder::new(outbounds).with_prober(prober).build(&config).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let route = router.pick_route(&Context::new(Network::Tcp)).unwrap();
    assert_eq!(route.outbound_tag, "out-fast");
    assert_eq!(route.rule_tag.as_deref(), Some("all"));
    assert_eq!(router.balancer("lb").unwrap().strategy().name(), "latency");

    router.shutdown();
}

fn latency_table(rules: Vec<RuleConfig>) -> RoutingConfig {
    RoutingConfig {
        rules,
        balancers: vec![BalancerConfig {
            tag: "lb".to_string(),
            selectors: strings(&["out-"]),
            strategy: StrategyKind::Latency,
            latency: LatencyConfig::default(),
        }],
        ..RoutingConfig::default()
    }
}

fn balanced_rule() -> RuleConfig {
    RuleConfig {
        balancer_tag: Some("lb".to_string()),
        network: Some("tcp".to_string()),
        ..RuleConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_reload_stops_replaced_probers() {
    let outbounds = registry(&["direct", "out-a"]);
    let prober = Arc::new(MockProber::new().with_delay("out-a", Duration::from_millis(10)));
    let builder = RouterBuilder::new(outbounds).with_prober(prober.clone());
    let service = RouterService::new(builder.build(&latency_table(vec![balanced_rule()])).unwrap());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(prober.calls(), 1);

    // Keep the old table alive so only the reload can stop its prober
    let replaced = service.router();
    let plain = RoutingConfig {
        rules: vec![RuleConfig {
            outbound_tag: Some("direct".to_string()),
            network: Some("tcp".to_string()),
            ..RuleConfig::default()
        }],
        ..RoutingConfig::default()
    };
    service.reload_from_config(&builder, &plain).unwrap();

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(prober.calls(), 1);
    assert_eq!(service.pick_route(&Context::new(Network::Tcp)).unwrap().outbound_tag, "direct");
    assert_eq!(replaced.rule_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_build_stops_started_probers() {
    let outbounds = registry(&["out-a", "out-b"]);
    let prober = Arc::new(MockProber::new());
    let config = latency_table(vec![balanced_rule(), RuleConfig {
        tag: Some("broken".to_string()),
        outbound_tag: Some("out-a".to_string()),
        ..RuleConfig::default()
    }]);

    let err = RouterBuilder::new(outbounds).with_prober(prober.clone()).build(&config).unwrap_err();
    assert!(matches!(&err, ConfigError::Rule { rule, .. } if rule == "broken"));
    assert!(matches!(err.root(), ConfigError::EmptyCondition));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(prober.calls(), 0);
}

#[test]
fn test_latency_balancer_needs_runtime() {
    let config = BalancerConfig {
        tag: "lb".to_string(),
        selectors: strings(&["out-"]),
        strategy: StrategyKind::Latency,
        latency: LatencyConfig::default(),
    };
    let err = Balancer::build(&config, registry(&["out-a"]), Some(Arc::new(MockProber::new()))).unwrap_err();
    assert!(matches!(err.root(), ConfigError::NoRuntime));
}
