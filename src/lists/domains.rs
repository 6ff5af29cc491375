//! Plain domain list parser.

use std::io::BufRead;

use super::{ListParseError, ListParser, content_lines};

/// Reads plain domain lists: one name or `*.` pattern per line.
///
/// Text after a `#` is a comment. Only the first whitespace-separated token
/// of a line is kept, so annotated lists load as-is:
///
/// ```text
/// # trackers
/// metrics.example.com
/// *.ads.example.com   tracking pixel host
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainListParser;

impl ListParser for DomainListParser {
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ListParseError> {
        let mut domains = Vec::new();
        content_lines(reader, |line| {
            // Only the first token counts; anything after whitespace is noise.
            if let Some(domain) = line.split_whitespace().next() {
                domains.push(domain.to_string());
            }
        })?;
        Ok(domains)
    }
}
