//! Exclusion policy: origins that must always bypass the cache

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A single rule matched against the request URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExclusionRule {
    /// The full URL contains the substring
    Contains(String),
    /// The host equals the value or is a subdomain of it
    Host(String),
    /// The URL uses this explicit port
    Port(u16),
}

impl ExclusionRule {
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            ExclusionRule::Contains(needle) => url.as_str().contains(needle.as_str()),
            ExclusionRule::Host(host) => match url.host_str() {
                Some(h) => {
                    let h = h.to_ascii_lowercase();
                    let host = host.to_ascii_lowercase();
                    h == host || h.ends_with(&format!(".{}", host))
                }
                None => false,
            },
            ExclusionRule::Port(port) => url.port() == Some(*port),
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionRule::Contains(s) => write!(f, "contains:{}", s),
            ExclusionRule::Host(h) => write!(f, "host:{}", h),
            ExclusionRule::Port(p) => write!(f, "port:{}", p),
        }
    }
}

/// Predicate deciding whether a URL is excluded from caching
pub trait ExclusionPolicy: Send + Sync {
    fn is_excluded(&self, url: &Url) -> bool;
}

/// Rule list; a URL is excluded when any rule matches
#[derive(Debug, Clone, Default)]
pub struct RuleExclusionPolicy {
    rules: Vec<ExclusionRule>,
}

impl RuleExclusionPolicy {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }
}

impl ExclusionPolicy for RuleExclusionPolicy {
    fn is_excluded(&self, url: &Url) -> bool {
        self.rules.iter().any(|rule| rule.matches(url))
    }
}

impl<F> ExclusionPolicy for F
where
    F: Fn(&Url) -> bool + Send + Sync,
{
    fn is_excluded(&self, url: &Url) -> bool {
        self(url)
    }
}
