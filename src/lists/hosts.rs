//! Hosts file parser.

use std::io::BufRead;
use std::net::IpAddr;

use super::{ListParseError, ListParser, content_lines};

/// Reads `/etc/hosts` style lists: an address followed by one or more names.
///
/// The address itself is discarded and may be any IPv4 or IPv6 literal,
/// so the same shape works for block lists (`0.0.0.0 ads.example.com`)
/// and allow lists. Lines that do not start with an address are skipped,
/// as are loopback and broadcast system names.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostsFileParser;

/// System names present in stock hosts files.
const IGNORED_DOMAINS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
];

impl ListParser for HostsFileParser {
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ListParseError> {
        let mut domains = Vec::new();
        content_lines(reader, |line| {
            let mut fields = line.split_whitespace();
            let is_entry = fields
                .next()
                .is_some_and(|address| address.parse::<IpAddr>().is_ok());
            if !is_entry {
                return;
            }

            domains.extend(
                fields
                    .filter(|name| !is_ignored(name))
                    .map(str::to_string),
            );
        })?;
        Ok(domains)
    }
}

fn is_ignored(name: &str) -> bool {
    IGNORED_DOMAINS
        .iter()
        .any(|ignored| ignored.eq_ignore_ascii_case(name))
        || name.parse::<IpAddr>().is_ok()
}
