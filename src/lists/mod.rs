//! Block and allow lists.
//!
//! The domain validator consults a [`DomainLists`] implementation once per
//! flush. [`StaticLists`] is the in-memory implementation, built from list
//! files in one of the supported formats:
//!
//! - **Domain List**: one domain per line, supports `*.` wildcards
//! - **Hosts File**: standard `/etc/hosts` format
//!
//! # Example
//!
//! ```
//! use dns_detector::lists::{ListParser, DomainListParser};
//! use std::io::BufReader;
//!
//! let content = "# Comment\nexample.com\n*.ads.com";
//! let domains = DomainListParser.parse(&mut BufReader::new(content.as_bytes())).unwrap();
//! assert_eq!(domains, vec!["example.com", "*.ads.com"]);
//! ```

mod domains;
mod hosts;
pub mod loader;
mod matcher;

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

pub use domains::DomainListParser;
pub use hosts::HostsFileParser;
pub use loader::{FileLoader, ListLoadError};
pub use matcher::{DomainSet, StaticLists};

use crate::config::ListFormat;
use crate::error::LookupError;

/// Per-domain hit map returned by a list lookup.
pub type Hits = HashMap<String, bool>;

/// Block-list and allow-list lookup.
///
/// Each method receives the full set of names accumulated in one batch and
/// answers for every one of them.
pub trait DomainLists: Send + Sync {
    fn check_blocklist(&self, domains: &[&str]) -> Result<Hits, LookupError>;

    fn check_allowlist(&self, domains: &[&str]) -> Result<Hits, LookupError>;
}

impl<T: DomainLists + ?Sized> DomainLists for Arc<T> {
    fn check_blocklist(&self, domains: &[&str]) -> Result<Hits, LookupError> {
        (**self).check_blocklist(domains)
    }

    fn check_allowlist(&self, domains: &[&str]) -> Result<Hits, LookupError> {
        (**self).check_allowlist(domains)
    }
}

/// A list file could not be read while parsing.
#[derive(Debug, thiserror::Error)]
pub enum ListParseError {
    #[error("failed to read list content: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns the text of one list file into raw patterns.
pub trait ListParser: Send + Sync {
    /// Parse list content and return domain patterns
    /// (e.g., `"example.com"`, `"*.ads.com"`).
    ///
    /// # Errors
    ///
    /// Returns a [`ListParseError`] if reading fails.
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ListParseError>;
}

/// Returns a boxed parser for the given list format.
#[must_use]
pub fn parser_for_format(format: ListFormat) -> Box<dyn ListParser> {
    match format {
        ListFormat::Domains => Box::new(DomainListParser),
        ListFormat::Hosts => Box::new(HostsFileParser),
    }
}

/// Iterate the meaningful lines of a list file: trimmed, non-empty, without `#` comments.
fn content_lines(
    reader: &mut dyn BufRead,
    mut on_line: impl FnMut(&str),
) -> Result<(), ListParseError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }

        let content = line.split('#').next().unwrap_or_default().trim();
        if !content.is_empty() {
            on_line(content);
        }
    }
}
