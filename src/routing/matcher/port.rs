//! Port Matching

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Result<Self, ConfigError> {
        if from > to {
            return Err(ConfigError::InvalidPort(format!("{}-{}", from, to)));
        }
        Ok(Self { from, to })
    }

    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

impl FromStr for PortRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidPort(s.to_string());
        match s.split_once('-') {
            Some((from, to)) => {
                let from = from.trim().parse::<u16>().map_err(|_| invalid())?;
                let to = to.trim().parse::<u16>().map_err(|_| invalid())?;
                Self::new(from, to)
            }
            None => s.parse::<u16>().map(Self::single).map_err(|_| invalid()),
        }
    }
}

/// Union of port ranges, merged so lookups are a binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortList {
    ranges: Vec<PortRange>,
}

impl PortList {
    pub fn new(mut ranges: Vec<PortRange>) -> Self {
        ranges.sort();
        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if u32::from(range.from) <= u32::from(last.to) + 1 => {
                    last.to = last.to.max(range.to);
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    /// Parse the `"53,443,1000-2000"` form
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let ranges = spec
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<PortRange>())
            .collect::<Result<Vec<_>, _>>()?;
        if ranges.is_empty() {
            return Err(ConfigError::InvalidPort(spec.to_string()));
        }
        Ok(Self::new(ranges))
    }

    pub fn contains(&self, port: u16) -> bool {
        let idx = self.ranges.partition_point(|r| r.from <= port);
        idx > 0 && self.ranges[idx - 1].contains(port)
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }
}
