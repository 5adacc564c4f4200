//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use rustroute::balancer::{OutboundProber, ProbeTarget, StaticOutboundManager};

/// Prober that sleeps a fixed time per outbound, or fails on demand
#[derive(Default)]
pub struct MockProber {
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, tag: &str, delay: Duration) -> Self {
        self.delays.insert(tag.to_string(), delay);
        self
    }

    pub fn with_failure(mut self, tag: &str) -> Self {
        self.failing.insert(tag.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundProber for MockProber {
    async fn probe(&self, outbound_tag: &str, _target: &ProbeTarget) -> rustroute::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(outbound_tag) {
            bail!("outbound '{}' is down", outbound_tag);
        }
        if let Some(delay) = self.delays.get(outbound_tag) {
            tokio::time::sleep(*delay).await;
        }
        Ok(())
    }
}

pub fn registry(tags: &[&str]) -> Arc<StaticOutboundManager> {
    Arc::new(StaticOutboundManager::new(tags.iter().copied()))
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
