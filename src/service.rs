//! Routing Service
//!
//! Holds the live routing table and swaps it atomically on reload. Readers
//! never block; a reload stops the replaced table's latency probers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::config::RoutingConfig;
use crate::error::{ConfigError, RoutingError};
use crate::routing::{Context, Route, Router, RouterBuilder};

pub struct RouterService {
    current: ArcSwap<Router>,
}

impl RouterService {
    pub fn new(router: Router) -> Self {
        Self {
            current: ArcSwap::from_pointee(router),
        }
    }

    /// Route a connection with the table that is live right now
    pub fn pick_route(&self, ctx: &Context) -> Result<Route, RoutingError> {
        self.current.load().pick_route(ctx)
    }

    /// Current table. Callers holding it keep it alive across reloads.
    pub fn router(&self) -> Arc<Router> {
        self.current.load_full()
    }

    /// Install a new table and shut down the previous one
    pub fn reload(&self, router: Router) {
        let rules = router.rule_count();
        let previous = self.current.swap(Arc::new(router));
        previous.shutdown();
        info!("Routing table reloaded ({} rules)", rules);
    }

    /// Build a table from configuration and install it. On error the live
    /// table stays in place.
    pub fn reload_from_config(&self, builder: &RouterBuilder, config: &RoutingConfig) -> Result<(), ConfigError> {
        match builder.build(config) {
            Ok(router) => {
                self.reload(router);
                Ok(())
            }
            Err(e) => {
                warn!("Routing reload rejected, keeping current table: {}", e);
                Err(e)
            }
        }
    }

    pub fn shutdown(&self) {
        self.current.load().shutdown();
    }
}

impl std::fmt::Debug for RouterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterService")
            .field("rules", &self.current.load().rule_count())
            .finish()
    }
}
