//! RustRoute - Proxy Routing Decision Engine
//!
//! Loads a routing table and either validates it or evaluates one
//! connection against it.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustroute::balancer::{OutboundManager, StaticOutboundManager, TcpConnectProber};
use rustroute::config::{Config, ConfigManager};
use rustroute::{Context, Network, RouterBuilder};

/// CLI arguments for RustRoute
#[derive(Parser, Debug)]
#[command(name = "rustroute")]
#[command(about = "RustRoute - Proxy Routing Decision Engine")]
#[command(version)]
#[command(long_about = "
RustRoute - Proxy Routing Decision Engine

Evaluates a connection against an ordered routing table and prints the
outbound it would be dispatched to.

Environment variables:
  RUSTROUTE_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
  RUSTROUTE_GEOIP_FILE        - TOML file with named GeoIP lists
  RUSTROUTE_DEFAULT_OUTBOUND  - Outbound used when no rule matches
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "routing.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); falls back to
    /// RUSTROUTE_LOG_LEVEL, then info
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[arg(long, help = "Destination domain or IP address")]
    pub dest: Option<String>,

    #[arg(short, long, help = "Destination port")]
    pub port: Option<u16>,

    #[arg(long, default_value = "tcp", help = "Transport: tcp, udp or unix")]
    pub network: Network,

    #[arg(long, help = "Source IP address")]
    pub source: Option<IpAddr>,

    #[arg(long, help = "Inbound tag")]
    pub inbound: Option<String>,

    #[arg(long, help = "Authenticated user")]
    pub user: Option<String>,

    #[arg(long, help = "Sniffed protocol")]
    pub protocol: Option<String>,

    #[arg(long, help = "Sniffed application")]
    pub app: Option<String>,

    /// Repeatable `key=value` connection attribute
    #[arg(long = "attr", help = "Connection attribute as key=value")]
    pub attrs: Vec<String>,

    /// Give latency balancers time to probe before routing
    #[arg(long, value_parser = humantime::parse_duration, help = "Wait before routing (e.g., 3s)")]
    pub probe_wait: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting RustRoute v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigManager::load_from_file(&args.config)?;

    let registry = Arc::new(StaticOutboundManager::new(config.outbounds.iter().map(|o| o.tag.clone())));
    let prober = Arc::new(TcpConnectProber::from_outbounds(&config.outbounds));
    let builder = RouterBuilder::new(registry.clone()).with_prober(prober);
    let router = builder
        .build(&config.routing)
        .context("Failed to build routing table")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Outbounds: {}", registry.tags().join(", "));
        info!("  Rules: {}", router.rule_count());
        info!("  Balancers: {}", router.balancer_tags().join(", "));
        info!(
            "  Default outbound: {}",
            config.routing.default_outbound.as_deref().unwrap_or("none")
        );
        router.shutdown();
        return Ok(());
    }

    let ctx = build_context(&args)?;

    if let Some(wait) = args.probe_wait {
        info!("Waiting {:?} for latency probes", wait);
        tokio::time::sleep(wait).await;
    }

    let outcome = router.pick_route(&ctx);
    router.shutdown();

    match outcome {
        Ok(route) => {
            println!(
                "{} -> {} (rule {})",
                ctx.target_display(),
                route.outbound_tag,
                route.rule_tag.as_deref().unwrap_or("-")
            );
        }
        Err(e) => match default_outbound(&config) {
            Some(outbound) => {
                warn!("{}; using default outbound '{}'", e, outbound);
                println!("{} -> {} (default)", ctx.target_display(), outbound);
            }
            None => bail!("Routing failed for {}: {}", ctx.target_display(), e),
        },
    }

    Ok(())
}

fn default_outbound(config: &Config) -> Option<&str> {
    config.routing.default_outbound.as_deref()
}

/// Build the connection context from CLI flags
fn build_context(args: &CliArgs) -> Result<Context> {
    let mut ctx = Context::new(args.network);

    if let Some(dest) = &args.dest {
        ctx = match dest.parse::<IpAddr>() {
            Ok(ip) => ctx.with_target_ip(ip),
            Err(_) => ctx.with_target_domain(dest.as_str()),
        };
    }
    if let Some(port) = args.port {
        ctx = ctx.with_target_port(port);
    }
    if let Some(source) = args.source {
        ctx = ctx.with_source(source, 0);
    }
    if let Some(inbound) = &args.inbound {
        ctx = ctx.with_inbound_tag(inbound.as_str());
    }
    if let Some(user) = &args.user {
        ctx = ctx.with_user(user.as_str());
    }
    if let Some(protocol) = &args.protocol {
        ctx = ctx.with_protocol(protocol.as_str());
    }
    if let Some(app) = &args.app {
        ctx = ctx.with_application(app.as_str());
    }
    for attr in &args.attrs {
        let (key, value) = attr
            .split_once('=')
            .with_context(|| format!("Invalid attribute '{}', expected key=value", attr))?;
        ctx = ctx.with_attribute(key, value);
    }

    Ok(ctx)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level
            .clone()
            .or_else(|| std::env::var("RUSTROUTE_LOG_LEVEL").ok())
            .unwrap_or_else(|| "info".to_string())
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
