//! Configuration Manager

use super::{Config, StrategyKind};
use crate::balancer::LatencySettings;
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when the file
    /// does not exist. Environment overrides are applied before validation.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let mut config = if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env_overrides()?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Parse and validate configuration text. Environment overrides are not
    /// applied.
    pub fn load_from_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }
}

impl Config {
    /// Override fields from `RUSTROUTE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var("RUSTROUTE_LOG_LEVEL") {
            tracing::info!("Environment override: log level set to {}", log_level);
            self.log.level = log_level;
        }

        if let Ok(geoip_file) = std::env::var("RUSTROUTE_GEOIP_FILE") {
            if geoip_file.trim().is_empty() {
                bail!("Invalid RUSTROUTE_GEOIP_FILE: empty path");
            }
            tracing::info!("Environment override: GeoIP file set to {}", geoip_file);
            self.routing.geoip_file = Some(PathBuf::from(geoip_file));
        }

        if let Ok(outbound) = std::env::var("RUSTROUTE_DEFAULT_OUTBOUND") {
            tracing::info!("Environment override: default outbound set to {}", outbound);
            self.routing.default_outbound = Some(outbound);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_log_config()
            .with_context(|| "Log configuration validation failed")?;

        self.validate_outbounds()
            .with_context(|| "Outbound configuration validation failed")?;

        self.validate_routing_config()
            .with_context(|| "Routing configuration validation failed")?;

        Ok(())
    }

    fn validate_log_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log.level.as_str()) {
            bail!("log.level must be one of: {}", valid_log_levels.join(", "));
        }
        Ok(())
    }

    fn validate_outbounds(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, outbound) in self.outbounds.iter().enumerate() {
            if outbound.tag.is_empty() {
                bail!("Outbound {} has empty tag", i);
            }
            if !seen.insert(outbound.tag.as_str()) {
                bail!("Duplicate outbound tag '{}'", outbound.tag);
            }
        }
        Ok(())
    }

    fn validate_routing_config(&self) -> Result<()> {
        if let Some(outbound) = &self.routing.default_outbound {
            if outbound.is_empty() {
                bail!("routing.default_outbound must not be empty");
            }
        }

        let mut balancers = HashSet::new();
        for (i, balancer) in self.routing.balancers.iter().enumerate() {
            if balancer.tag.is_empty() {
                bail!("Balancer {} has empty tag", i);
            }
            if !balancers.insert(balancer.tag.as_str()) {
                bail!("Duplicate balancer tag '{}'", balancer.tag);
            }
            if balancer.selectors.is_empty() {
                bail!("Balancer '{}' has no selectors", balancer.tag);
            }
            if balancer.strategy == StrategyKind::Latency {
                LatencySettings::from_config(&balancer.latency)
                    .with_context(|| format!("Balancer '{}' latency settings are invalid", balancer.tag))?;
            }
        }

        for (i, rule) in self.routing.rules.iter().enumerate() {
            let name = rule.display_name(i);
            match (&rule.outbound_tag, &rule.balancer_tag) {
                (Some(_), None) => {}
                (None, Some(tag)) => {
                    if !balancers.contains(tag.as_str()) {
                        bail!("Rule '{}' references unknown balancer '{}'", name, tag);
                    }
                }
                (Some(_), Some(_)) => {
                    bail!("Rule '{}' sets both outbound_tag and balancer_tag", name);
                }
                (None, None) => {
                    bail!("Rule '{}' sets neither outbound_tag nor balancer_tag", name);
                }
            }
        }

        Ok(())
    }
}
