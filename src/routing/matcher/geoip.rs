//! GeoIP List Sources
//!
//! Resolves a list name (a country code or a category such as `private`) to
//! the CIDR entries it stands for.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::cidr::{parse_cidrs, CidrEntry};
use crate::error::ConfigError;

/// Pluggable source of named IP-range lists.
pub trait GeoIpSource: Send + Sync {
    /// Resolve `name` to its entries; unknown names are an error.
    fn resolve(&self, name: &str) -> Result<Vec<CidrEntry>, ConfigError>;
}

/// Reserved and private ranges, always available as `private`.
const PRIVATE_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/3",
    "::/127",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

#[derive(Debug, Deserialize)]
struct GeoIpFile {
    #[serde(default)]
    lists: HashMap<String, Vec<String>>,
}

/// In-memory collection of named lists, case-insensitive by name.
#[derive(Debug, Clone)]
pub struct GeoIpDatabase {
    lists: HashMap<String, Vec<CidrEntry>>,
}

impl GeoIpDatabase {
    /// Database holding only the built-in `private` list
    pub fn new() -> Self {
        let private = PRIVATE_RANGES
            .iter()
            .filter_map(|s| s.parse::<CidrEntry>().ok())
            .collect();
        let mut lists = HashMap::new();
        lists.insert("private".to_string(), private);
        Self { lists }
    }

    /// Empty database without the built-in list
    pub fn empty() -> Self {
        Self {
            lists: HashMap::new(),
        }
    }

    /// Add (or replace) a named list
    pub fn insert(&mut self, name: &str, entries: Vec<CidrEntry>) {
        self.lists.insert(name.to_lowercase(), entries);
    }

    /// Parse a TOML document of the form `[lists] name = ["cidr", ...]`
    pub fn load_from_str(&mut self, content: &str) -> Result<usize, ConfigError> {
        let file: GeoIpFile = toml::from_str(content).map_err(|e| ConfigError::GeoIpData {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;

        let count = file.lists.len();
        for (name, items) in file.lists {
            let entries = parse_cidrs(&items)?;
            debug!("Loaded GeoIP list '{}' with {} entries", name, entries.len());
            self.insert(&name, entries);
        }
        Ok(count)
    }

    /// Load lists from a TOML file, merging into this database
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::GeoIpData {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let count = self.load_from_str(&content).map_err(|e| match e {
            ConfigError::GeoIpData { reason, .. } => ConfigError::GeoIpData {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        info!("Loaded {} GeoIP lists from {}", count, path.display());
        Ok(count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lists.contains_key(&name.to_lowercase())
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lists.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for GeoIpDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoIpSource for GeoIpDatabase {
    fn resolve(&self, name: &str) -> Result<Vec<CidrEntry>, ConfigError> {
        self.lists
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGeoIpList(name.to_string()))
    }
}

/// Resolve every name through `source`, stopping at the first unknown list
pub fn resolve_lists(
    source: &dyn GeoIpSource,
    names: &[String],
) -> Result<Vec<Vec<CidrEntry>>, ConfigError> {
    names.iter().map(|name| source.resolve(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn test_builtin_private_list() {
        let db = GeoIpDatabase::new();
        let private = db.resolve("PRIVATE").unwrap();
        assert_eq!(private.len(), PRIVATE_RANGES.len());

        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(private.iter().any(|e| e.contains(&ip)));
    }

    #[test]
    fn test_unknown_list_is_an_error() {
        let db = GeoIpDatabase::empty();
        assert!(matches!(db.resolve("cn"), Err(ConfigError::UnknownGeoIpList(name)) if name == "cn"));
    }

    #[test]
    fn test_load_from_str() {
        let mut db = GeoIpDatabase::new();
        let count = db
            .load_from_str(
                r#"
                [lists]
                CN = ["1.0.1.0/24", "1.0.2.0/23"]
                test = ["2001:db8::/32"]
                "#,
            )
            .unwrap();
        assert_eq!(count, 2);
        assert!(db.contains("cn"));
        assert_eq!(db.resolve("Cn").unwrap().len(), 2);
        assert_eq!(db.list_names(), vec!["cn", "private", "test"]);
    }

    #[test]
    fn test_load_rejects_bad_cidr() {
        let mut db = GeoIpDatabase::empty();
        let err = db.load_from_str("[lists]\nbad = [\"300.0.0.0/8\"]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCidr(_)));
    }
}
