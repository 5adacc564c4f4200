//! Outbound Registry
//!
//! The router never dials; it only needs to know which outbound tags are
//! live right now.

use std::collections::BTreeSet;

use arc_swap::ArcSwap;
use tracing::debug;

/// View of the live outbound handlers
pub trait OutboundManager: Send + Sync {
    /// Whether a live outbound with this tag exists
    fn has_handler(&self, tag: &str) -> bool;

    /// All live tags, in a stable order
    fn tags(&self) -> Vec<String>;
}

/// Resolve selector prefixes against the registry.
///
/// Candidates come out in selector order, then tag order, without duplicates.
pub fn select_outbounds(outbounds: &dyn OutboundManager, selectors: &[String]) -> Vec<String> {
    let tags = outbounds.tags();
    let mut selected: Vec<String> = Vec::new();
    for selector in selectors {
        for tag in &tags {
            if tag.starts_with(selector.as_str()) && !selected.contains(tag) {
                selected.push(tag.clone());
            }
        }
    }
    selected
}

/// In-memory registry with copy-on-write updates, so readers never block.
#[derive(Debug, Default)]
pub struct StaticOutboundManager {
    tags: ArcSwap<BTreeSet<String>>,
}

impl StaticOutboundManager {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        Self {
            tags: ArcSwap::from_pointee(tags),
        }
    }

    pub fn add(&self, tag: &str) {
        self.tags.rcu(|current| {
            let mut next = BTreeSet::clone(current);
            next.insert(tag.to_string());
            next
        });
        debug!("Registered outbound '{}'", tag);
    }

    pub fn remove(&self, tag: &str) -> bool {
        let previous = self.tags.rcu(|current| {
            let mut next = BTreeSet::clone(current);
            next.remove(tag);
            next
        });
        let removed = previous.contains(tag);
        if removed {
            debug!("Unregistered outbound '{}'", tag);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tags.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.load().is_empty()
    }
}

impl OutboundManager for StaticOutboundManager {
    fn has_handler(&self, tag: &str) -> bool {
        self.tags.load().contains(tag)
    }

    fn tags(&self) -> Vec<String> {
        self.tags.load().iter().cloned().collect()
    }
}
