//! Latency Balancing Strategy
//!
//! A background prober measures every candidate outbound on a fixed interval
//! and keeps a bounded window of successful round-trip times per outbound.
//! Picks rank candidates by the mean of that window.
//!
//! Tie-breaking: every candidate whose score is within `tolerance` of the
//! best score counts as tied, and the first of them in candidate order
//! (selector order, then tag order) wins. Picks are therefore deterministic
//! for a given window state, and a tolerance keeps traffic on the preferred
//! outbound instead of flapping between near-equal ones.
//!
//! Health records are replaced copy-on-write, so a pick always sees complete
//! windows even while probes are landing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::outbound::{select_outbounds, OutboundManager};
use super::probe::{OutboundProber, ProbeTarget};
use super::BalancingStrategy;

/// Largest accepted rolling window
pub const MAX_TOTAL_MEASURES: usize = 1024;
use crate::config::LatencyConfig;
use crate::error::{ConfigError, RoutingError};

/// Tuning for [`LatencyStrategy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySettings {
    /// Rolling window size per outbound
    pub total_measures: usize,
    pub interval: Duration,
    /// Wait before the first probe cycle
    pub delay: Duration,
    /// Bound on a single probe
    pub timeout: Duration,
    pub tolerance: Duration,
    pub probe: ProbeTarget,
}

impl LatencySettings {
    pub fn from_config(config: &LatencyConfig) -> Result<Self, ConfigError> {
        if config.total_measures == 0 {
            return Err(ConfigError::InvalidLatencySetting(
                "total_measures must be at least 1".to_string(),
            ));
        }
        if config.total_measures > MAX_TOTAL_MEASURES {
            return Err(ConfigError::InvalidLatencySetting(format!(
                "total_measures must be at most {}, got {}",
                MAX_TOTAL_MEASURES, config.total_measures
            )));
        }
        if config.interval.is_zero() {
            return Err(ConfigError::InvalidLatencySetting(
                "interval must be greater than 0".to_string(),
            ));
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidLatencySetting(
                "timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            total_measures: config.total_measures,
            interval: config.interval,
            delay: config.delay,
            timeout: config.timeout,
            tolerance: config.tolerance,
            probe: ProbeTarget::from_config(config),
        })
    }
}

impl Default for LatencySettings {
    fn default() -> Self {
        let config = LatencyConfig::default();
        Self {
            total_measures: config.total_measures,
            interval: config.interval,
            delay: config.delay,
            timeout: config.timeout,
            tolerance: config.tolerance,
            probe: ProbeTarget::from_config(&config),
        }
    }
}

/// Outcome of the most recent probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Never probed
    Unknown,
    Healthy,
    Unhealthy,
}

/// Probe history for one outbound
#[derive(Debug, Clone)]
pub struct HealthRecord {
    tag: String,
    samples: VecDeque<Duration>,
    capacity: usize,
    status: HealthStatus,
    successes: u64,
    failures: u64,
    last_probe: Option<Instant>,
}

impl HealthRecord {
    pub fn new(tag: &str, capacity: usize) -> Self {
        Self {
            tag: tag.to_string(),
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            status: HealthStatus::Unknown,
            successes: 0,
            failures: 0,
            last_probe: None,
        }
    }

    pub fn record_success(&mut self, rtt: Duration, at: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
        self.successes += 1;
        self.status = HealthStatus::Healthy;
        self.last_probe = Some(at);
    }

    /// Failures only move the status; the window keeps its samples.
    pub fn record_failure(&mut self, at: Instant) {
        self.failures += 1;
        self.status = HealthStatus::Unhealthy;
        self.last_probe = Some(at);
    }

    /// Mean round-trip time of the window, `None` before the first success
    pub fn score(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn samples(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }
}

/// Health counts across the current candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

impl HealthSummary {
    pub fn health_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.healthy as f64 / self.total as f64) * 100.0
    }

    pub fn is_healthy(&self) -> bool {
        self.total > 0 && self.unhealthy == 0
    }
}

type Records = HashMap<String, Arc<HealthRecord>>;

struct ProbeWorker {
    outbounds: Arc<dyn OutboundManager>,
    selectors: Vec<String>,
    prober: Arc<dyn OutboundProber>,
    settings: LatencySettings,
    records: ArcSwap<Records>,
}

impl ProbeWorker {
    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Latency prober starting for selectors {:?} (interval {:?}, delay {:?})",
            self.selectors, self.settings.interval, self.settings.delay
        );

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Latency prober for {:?} stopped before first cycle", self.selectors);
                return;
            }
            _ = sleep(self.settings.delay) => {}
        }

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let cycle = Arc::clone(&self).probe_all();
            tokio::select! {
                _ = shutdown.recv() => break,
                probed = cycle => debug!("Probe cycle finished for {} outbounds", probed),
            }
        }

        info!("Latency prober for {:?} stopped", self.selectors);
    }

    /// One cycle: probe every live candidate concurrently. Dropping the
    /// returned future abandons in-flight probes.
    async fn probe_all(self: Arc<Self>) -> usize {
        let candidates = select_outbounds(self.outbounds.as_ref(), &self.selectors);
        self.retain_records(&candidates);

        let mut probes = JoinSet::new();
        for tag in candidates {
            let worker = Arc::clone(&self);
            probes.spawn(async move { worker.probe_one(tag).await });
        }

        let mut probed = 0;
        while let Some(result) = probes.join_next().await {
            match result {
                Ok(()) => probed += 1,
                Err(e) => warn!("Probe task ended abnormally: {}", e),
            }
        }
        probed
    }

    async fn probe_one(&self, tag: String) {
        let started = Instant::now();
        let outcome = timeout(self.settings.timeout, self.prober.probe(&tag, &self.settings.probe)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                debug!("Probe through '{}' took {:?}", tag, elapsed);
                self.record(&tag, Some(elapsed));
            }
            Ok(Err(e)) => {
                warn!("Probe through '{}' failed: {}", tag, e);
                self.record(&tag, None);
            }
            Err(_) => {
                warn!("Probe through '{}' timed out after {:?}", tag, self.settings.timeout);
                self.record(&tag, None);
            }
        }
    }

    /// Forget outbounds that are no longer candidates
    fn retain_records(&self, candidates: &[String]) {
        let live: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        if self.records.load().keys().all(|tag| live.contains(tag.as_str())) {
            return;
        }
        self.records.rcu(|current| {
            let mut next = Records::clone(current);
            next.retain(|tag, _| live.contains(tag.as_str()));
            next
        });
    }

    fn record(&self, tag: &str, rtt: Option<Duration>) {
        let now = Instant::now();
        let capacity = self.settings.total_measures;
        self.records.rcu(|current| {
            let mut next = Records::clone(current);
            let mut record = next
                .get(tag)
                .map(|r| HealthRecord::clone(r))
                .unwrap_or_else(|| HealthRecord::new(tag, capacity));
            match rtt {
                Some(rtt) => record.record_success(rtt, now),
                None => record.record_failure(now),
            }
            next.insert(tag.to_string(), Arc::new(record));
            next
        });
    }
}

/// Picks the outbound with the lowest measured latency.
pub struct LatencyStrategy {
    worker: Arc<ProbeWorker>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LatencyStrategy {
    /// Create the strategy without starting the background prober
    pub fn new(
        outbounds: Arc<dyn OutboundManager>,
        selectors: Vec<String>,
        prober: Arc<dyn OutboundProber>,
        settings: LatencySettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            worker: Arc::new(ProbeWorker {
                outbounds,
                selectors,
                prober,
                settings,
                records: ArcSwap::from_pointee(Records::new()),
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Create the strategy and start probing on the current tokio runtime
    pub fn spawn(
        outbounds: Arc<dyn OutboundManager>,
        selectors: Vec<String>,
        prober: Arc<dyn OutboundProber>,
        settings: LatencySettings,
    ) -> Result<Self, ConfigError> {
        let strategy = Self::new(outbounds, selectors, prober, settings);
        strategy.start()?;
        Ok(strategy)
    }

    /// Start the background prober; a no-op if it is already running
    pub fn start(&self) -> Result<(), ConfigError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return Ok(());
        }
        let shutdown = self.shutdown_tx.subscribe();
        *task = Some(runtime.spawn(Arc::clone(&self.worker).run(shutdown)));
        Ok(())
    }

    /// Run one full probe cycle now and wait for it
    pub async fn probe_all(&self) -> usize {
        Arc::clone(&self.worker).probe_all().await
    }

    pub fn is_running(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        task.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Wait until the background prober has exited
    pub async fn stopped(&self) {
        let handle = {
            let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Latency prober task failed: {}", e);
                }
            }
        }
    }

    pub fn settings(&self) -> &LatencySettings {
        &self.worker.settings
    }

    pub fn health_record(&self, tag: &str) -> Option<HealthRecord> {
        self.worker.records.load().get(tag).map(|r| HealthRecord::clone(r))
    }

    /// Consistent copy of every record, sorted by tag
    pub fn health_snapshot(&self) -> Vec<HealthRecord> {
        let records = self.worker.records.load();
        let mut snapshot: Vec<HealthRecord> = records.values().map(|r| HealthRecord::clone(r)).collect();
        snapshot.sort_by(|a, b| a.tag.cmp(&b.tag));
        snapshot
    }

    /// Health counts over the outbounds the selectors match right now
    pub fn health_summary(&self) -> HealthSummary {
        let candidates = select_outbounds(self.worker.outbounds.as_ref(), &self.worker.selectors);
        let records = self.worker.records.load();
        let mut summary = HealthSummary {
            total: candidates.len(),
            ..HealthSummary::default()
        };
        for tag in &candidates {
            match records.get(tag).map(|r| r.status) {
                Some(HealthStatus::Healthy) => summary.healthy += 1,
                Some(HealthStatus::Unhealthy) => summary.unhealthy += 1,
                Some(HealthStatus::Unknown) | None => summary.unknown += 1,
            }
        }
        summary
    }
}

impl BalancingStrategy for LatencyStrategy {
    fn pick_outbound(&self, candidates: &[String]) -> Result<String, RoutingError> {
        if candidates.is_empty() {
            return Err(RoutingError::EmptyCandidateSet);
        }

        let records = self.worker.records.load();
        let scored: Vec<(&String, Duration)> = candidates
            .iter()
            .filter_map(|tag| records.get(tag).and_then(|r| r.score()).map(|score| (tag, score)))
            .collect();

        let Some(best) = scored.iter().map(|(_, score)| *score).min() else {
            debug!("No latency samples yet, picking randomly among {} outbounds", candidates.len());
            return candidates
                .choose(&mut rand::thread_rng())
                .cloned()
                .ok_or(RoutingError::EmptyCandidateSet);
        };

        let threshold = best.saturating_add(self.worker.settings.tolerance);
        let (tag, score) = scored
            .iter()
            .find(|(_, score)| *score <= threshold)
            .ok_or(RoutingError::EmptyCandidateSet)?;
        debug!("Selected '{}' with mean latency {:?} (best {:?})", tag, score, best);
        Ok(tag.to_string())
    }

    fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Latency prober for {:?} was not running", self.worker.selectors);
        }
    }

    fn name(&self) -> &'static str {
        "latency"
    }
}

impl Drop for LatencyStrategy {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        let task = self.task.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for LatencyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyStrategy")
            .field("selectors", &self.worker.selectors)
            .field("settings", &self.worker.settings)
            .finish()
    }
}
