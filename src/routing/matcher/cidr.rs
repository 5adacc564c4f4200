//! CIDR Lists and IP Range Lookup
//!
//! Named GeoIP lists and raw CIDR entries are flattened into one sorted,
//! deduplicated list and then folded into merged address ranges searched with
//! a binary search. IPv4 and IPv6 ranges live in separate tables, so the two
//! families never cross-match.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::ConfigError;
use crate::routing::Context;

/// A single CIDR entry: base address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrEntry {
    net: IpNet,
}

impl CidrEntry {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, ConfigError> {
        IpNet::new(addr, prefix)
            .map(|net| Self { net })
            .map_err(|_| ConfigError::InvalidCidr(format!("{}/{}", addr, prefix)))
    }

    /// A single-address entry (/32 or /128)
    pub fn host(addr: IpAddr) -> Self {
        Self { net: IpNet::from(addr) }
    }

    pub fn addr(&self) -> IpAddr {
        self.net.addr()
    }

    pub fn prefix(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Length of the address in bytes (4 or 16)
    pub fn addr_len(&self) -> usize {
        match self.net {
            IpNet::V4(_) => 4,
            IpNet::V6(_) => 16,
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.net.contains(ip)
    }
}

/// Shorter addresses first, then byte-wise, then ascending prefix length.
impl Ord for CidrEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_bytes = match (self.net.addr(), other.net.addr()) {
            (IpAddr::V4(a), IpAddr::V4(b)) => a.octets().cmp(&b.octets()),
            (IpAddr::V6(a), IpAddr::V6(b)) => a.octets().cmp(&b.octets()),
            (IpAddr::V4(_), IpAddr::V6(_)) => Ordering::Less,
            (IpAddr::V6(_), IpAddr::V4(_)) => Ordering::Greater,
        };
        by_bytes.then(self.prefix().cmp(&other.prefix()))
    }
}

impl PartialOrd for CidrEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for CidrEntry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self { net });
        }
        s.parse::<IpAddr>()
            .map(Self::host)
            .map_err(|_| ConfigError::InvalidCidr(s.to_string()))
    }
}

impl fmt::Display for CidrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// Parse a list of textual CIDRs
pub fn parse_cidrs(items: &[String]) -> Result<Vec<CidrEntry>, ConfigError> {
    items.iter().map(|s| s.parse()).collect()
}

/// Sort a CIDR list in canonical order and drop exact duplicates
pub fn normalize_cidrs(mut entries: Vec<CidrEntry>) -> Vec<CidrEntry> {
    entries.sort();
    entries.dedup();
    entries
}

/// Disjoint inclusive ranges, sorted by start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RangeTable<T> {
    ranges: Vec<(T, T)>,
}

impl<T: Copy + Ord> RangeTable<T> {
    fn contains(&self, value: T) -> bool {
        let idx = self.ranges.partition_point(|(start, _)| *start <= value);
        idx > 0 && self.ranges[idx - 1].1 >= value
    }
}

impl RangeTable<u32> {
    fn from_nets(nets: Vec<Ipv4Net>) -> Self {
        let mut ranges: Vec<(u32, u32)> = Ipv4Net::aggregate(&nets)
            .iter()
            .map(|net| (u32::from(net.network()), u32::from(net.broadcast())))
            .collect();
        ranges.sort_unstable();
        Self { ranges }
    }
}

impl RangeTable<u128> {
    fn from_nets(nets: Vec<Ipv6Net>) -> Self {
        let mut ranges: Vec<(u128, u128)> = Ipv6Net::aggregate(&nets)
            .iter()
            .map(|net| (u128::from(net.network()), u128::from(net.broadcast())))
            .collect();
        ranges.sort_unstable();
        Self { ranges }
    }
}

/// Membership structure over a set of CIDR entries.
#[derive(Debug, Clone, Default)]
pub struct IpRangeSet {
    v4: RangeTable<u32>,
    v6: RangeTable<u128>,
    entries: usize,
}

impl IpRangeSet {
    pub fn new(entries: Vec<CidrEntry>) -> Self {
        let entries = normalize_cidrs(entries);
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for entry in &entries {
            match entry.net.trunc() {
                IpNet::V4(net) => v4.push(net),
                IpNet::V6(net) => v6.push(net),
            }
        }
        Self {
            v4: RangeTable::<u32>::from_nets(v4),
            v6: RangeTable::<u128>::from_nets(v6),
            entries: entries.len(),
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.v4.contains(u32::from(*v4)),
            IpAddr::V6(v6) => self.v6.contains(u128::from(*v6)),
        }
    }

    /// Number of distinct CIDR entries the set was built from
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Matches destination (or, reversed, source) addresses against CIDR lists.
#[derive(Debug, Clone)]
pub struct GeoIpMatcher {
    set: IpRangeSet,
    reverse: bool,
}

impl GeoIpMatcher {
    /// Flatten several lists into one lookup structure.
    /// `reverse` tests the source address instead of the destination.
    pub fn new(lists: Vec<Vec<CidrEntry>>, reverse: bool) -> Self {
        let flat: Vec<CidrEntry> = lists.into_iter().flatten().collect();
        Self {
            set: IpRangeSet::new(flat),
            reverse,
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn matches_ip(&self, ip: &IpAddr) -> bool {
        self.set.contains(ip)
    }

    pub fn apply(&self, ctx: &Context) -> bool {
        let ips = if self.reverse {
            ctx.source_ips()
        } else {
            &ctx.target_ips
        };
        ips.iter().any(|ip| self.set.contains(ip))
    }
}
