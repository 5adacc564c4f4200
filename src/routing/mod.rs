//! Routing Module
//!
//! Evaluates a connection context against an ordered rule table and
//! produces the outbound tag to dispatch it to.

pub mod condition;
pub mod context;
pub mod matcher;
pub mod router;
pub mod rules;

pub use condition::{Condition, ConditionChain};
pub use context::{Context, Network};
pub use matcher::{GeoIpDatabase, GeoIpSource, PortList, PortRange};
pub use router::{Route, Router, RouterBuilder};
pub use rules::{build_condition, Rule, RuleTarget};
