//! In-memory domain sets with wildcard matching.

use std::collections::HashSet;

use tracing::info;

use super::{DomainLists, Hits};
use crate::error::LookupError;

/// A compiled domain list for efficient lookups.
///
/// Patterns are normalized at construction time (lowercase, no trailing
/// dot) so lookups only normalize the queried name.
#[derive(Debug, Clone, Default)]
pub struct DomainSet {
    /// Exact domain matches.
    exact: HashSet<String>,
    /// Wildcard suffixes (the part after "*", e.g., ".ads.com").
    wildcard_suffixes: Vec<String>,
}

impl DomainSet {
    /// Create a set from a list of patterns.
    ///
    /// Patterns can be:
    /// - Exact matches: "example.com"
    /// - Wildcard matches: "*.example.com" (matches any subdomain, not the base domain)
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        set.extend(patterns);
        set
    }

    /// Add more patterns to the set.
    pub fn extend<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = normalize(pattern.as_ref());
            if pattern.is_empty() {
                continue;
            }
            match pattern.strip_prefix('*') {
                Some(suffix) if suffix.starts_with('.') && suffix.len() > 1 => {
                    self.wildcard_suffixes.push(suffix.to_string());
                }
                Some(_) => {}
                None => {
                    self.exact.insert(pattern);
                }
            }
        }
    }

    /// Check if a domain name is in the set, ignoring case and a trailing dot.
    #[inline]
    pub fn contains(&self, domain: &str) -> bool {
        let domain = normalize(domain);

        self.exact.contains(&domain)
            || self
                .wildcard_suffixes
                .iter()
                .any(|suffix| domain.ends_with(suffix.as_str()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard_suffixes.is_empty()
    }

    /// Returns the total number of patterns.
    #[inline]
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard_suffixes.len()
    }
}

fn normalize(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

/// Block and allow lists held in memory for the lifetime of the process.
///
/// Lookups never fail.
#[derive(Debug, Clone, Default)]
pub struct StaticLists {
    blocklist: DomainSet,
    allowlist: DomainSet,
}

impl StaticLists {
    pub fn new(blocklist: DomainSet, allowlist: DomainSet) -> Self {
        Self {
            blocklist,
            allowlist,
        }
    }

    /// Build both lists from raw patterns.
    pub fn from_patterns<B, A, S, T>(blocklist: B, allowlist: A) -> Self
    where
        B: IntoIterator<Item = S>,
        A: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self::new(DomainSet::new(blocklist), DomainSet::new(allowlist))
    }

    pub fn blocklist(&self) -> &DomainSet {
        &self.blocklist
    }

    pub fn allowlist(&self) -> &DomainSet {
        &self.allowlist
    }
}

fn lookup(set: &DomainSet, domains: &[&str]) -> Hits {
    domains
        .iter()
        .map(|domain| ((*domain).to_string(), set.contains(domain)))
        .collect()
}

impl DomainLists for StaticLists {
    fn check_blocklist(&self, domains: &[&str]) -> Result<Hits, LookupError> {
        let hits = lookup(&self.blocklist, domains);
        for (domain, _) in hits.iter().filter(|(_, hit)| **hit) {
            info!(domain = %domain, "blocklisted domain observed");
        }
        Ok(hits)
    }

    fn check_allowlist(&self, domains: &[&str]) -> Result<Hits, LookupError> {
        Ok(lookup(&self.allowlist, domains))
    }
}
