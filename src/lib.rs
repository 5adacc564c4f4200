//! RustRoute Library
//!
//! Rule-based routing decisions for proxy connections: match a connection
//! context against an ordered rule table and pick the outbound to use,
//! optionally through a random or latency-probing balancer.

pub mod balancer;
pub mod config;
pub mod error;
pub mod routing;
pub mod service;

pub use balancer::{Balancer, BalancingStrategy, OutboundManager, OutboundProber, StaticOutboundManager};
pub use config::Config;
pub use error::{ConfigError, RoutingError};
pub use routing::{Context, Network, Route, Router, RouterBuilder};
pub use service::RouterService;

/// Common error type for configuration and application plumbing
pub type Result<T> = anyhow::Result<T>;
