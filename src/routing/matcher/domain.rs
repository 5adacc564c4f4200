//! Domain Matching
//!
//! Patterns use the familiar prefixed syntax:
//! `full:example.com`, `domain:example.com` (suffix on label boundary),
//! `keyword:google` (substring), `regexp:^ads\.`. An unprefixed pattern is a
//! substring match.

use std::collections::HashSet;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};

use crate::error::ConfigError;

/// Kind of a single domain pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Full,
    Substring,
    Regex,
    Suffix,
}

/// A parsed (not yet compiled) domain pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPattern {
    pub kind: DomainKind,
    pub value: String,
}

impl DomainPattern {
    pub fn new(kind: DomainKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl FromStr for DomainPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = if let Some(rest) = s.strip_prefix("full:") {
            (DomainKind::Full, rest)
        } else if let Some(rest) = s.strip_prefix("domain:") {
            (DomainKind::Suffix, rest)
        } else if let Some(rest) = s.strip_prefix("keyword:") {
            (DomainKind::Substring, rest)
        } else if let Some(rest) = s.strip_prefix("regexp:") {
            (DomainKind::Regex, rest)
        } else {
            (DomainKind::Substring, s)
        };

        if value.is_empty() {
            return Err(ConfigError::InvalidDomain(s.to_string()));
        }

        // Regexes keep their case; case-insensitivity is a compile flag.
        let value = match kind {
            DomainKind::Regex => value.to_string(),
            _ => value.trim_end_matches('.').to_lowercase(),
        };
        if value.is_empty() {
            return Err(ConfigError::InvalidDomain(s.to_string()));
        }

        Ok(Self { kind, value })
    }
}

/// Matches the connection's destination domain against a pattern list.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    full: HashSet<String>,
    suffixes: Vec<String>,
    substrings: Vec<String>,
    regexes: Vec<Regex>,
}

impl DomainMatcher {
    /// Build from parsed patterns; regexes are compiled here so a bad one
    /// fails the whole rule.
    pub fn new(patterns: &[DomainPattern]) -> Result<Self, ConfigError> {
        let mut matcher = Self {
            full: HashSet::new(),
            suffixes: Vec::new(),
            substrings: Vec::new(),
            regexes: Vec::new(),
        };

        for pattern in patterns {
            match pattern.kind {
                DomainKind::Full => {
                    matcher.full.insert(pattern.value.to_lowercase());
                }
                DomainKind::Suffix => matcher.suffixes.push(pattern.value.to_lowercase()),
                DomainKind::Substring => matcher.substrings.push(pattern.value.to_lowercase()),
                DomainKind::Regex => {
                    let regex = RegexBuilder::new(&pattern.value)
                        .case_insensitive(true)
                        .build()
                        .map_err(|source| ConfigError::InvalidRegex {
                            pattern: pattern.value.clone(),
                            source,
                        })?;
                    matcher.regexes.push(regex);
                }
            }
        }

        Ok(matcher)
    }

    /// Parse and build from the textual form used in configuration
    pub fn from_strings(patterns: &[String]) -> Result<Self, ConfigError> {
        let parsed = patterns
            .iter()
            .map(|p| p.parse::<DomainPattern>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&parsed)
    }

    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return false;
        }

        if self.full.contains(&domain) {
            return true;
        }
        if self.suffixes.iter().any(|suffix| is_suffix_match(&domain, suffix)) {
            return true;
        }
        if self.substrings.iter().any(|s| domain.contains(s.as_str())) {
            return true;
        }
        self.regexes.iter().any(|r| r.is_match(&domain))
    }

    pub fn len(&self) -> usize {
        self.full.len() + self.suffixes.len() + self.substrings.len() + self.regexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_suffix_match(domain: &str, suffix: &str) -> bool {
    if domain == suffix {
        return true;
    }
    domain.ends_with(suffix) && domain.as_bytes()[domain.len() - suffix.len() - 1] == b'.'
}
