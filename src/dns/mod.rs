//! DNS response decoding and the packet filter stage.

mod filter;

use hickory_proto::op::{Header, MessageType, Query};
use hickory_proto::rr::Name;
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use tracing::trace;

pub use filter::PacketFilter;

/// One parsed DNS response.
///
/// The header response code applies to every name in the question section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsInfo {
    domains: Vec<String>,
    response_code: u16,
}

impl DnsInfo {
    pub fn new(domains: Vec<String>, response_code: u16) -> Self {
        Self {
            domains,
            response_code,
        }
    }

    /// Question names in the order they appear in the packet.
    #[inline]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    #[inline]
    pub const fn response_code(&self) -> u16 {
        self.response_code
    }

    /// Consume the record, returning its names and response code.
    pub fn into_parts(self) -> (Vec<String>, u16) {
        (self.domains, self.response_code)
    }
}

/// Decode the header and question section of a DNS message.
///
/// Returns `None` if the header cannot be decoded or the message is a query.
/// Answer, authority and additional sections are never read, so truncated
/// captures still yield their question names. A question that fails to
/// decode ends the section; names decoded before it are kept.
pub fn parse_dns_response(payload: &[u8]) -> Option<DnsInfo> {
    let mut decoder = BinDecoder::new(payload);
    let header = Header::read(&mut decoder).ok()?;

    if header.message_type() != MessageType::Response {
        return None;
    }

    let count = header.query_count();
    let mut domains = Vec::with_capacity(usize::from(count));
    for index in 0..count {
        match Query::read(&mut decoder) {
            Ok(query) => domains.push(domain_name(query.name())),
            Err(e) => {
                trace!(index, error = %e, "truncated question section");
                break;
            }
        }
    }

    Some(DnsInfo::new(domains, u16::from(header.response_code())))
}

/// Presentation form of a name without the trailing root dot.
fn domain_name(name: &Name) -> String {
    let mut ascii = name.to_ascii();
    if !name.is_root() && ascii.ends_with('.') {
        ascii.pop();
    }
    ascii
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hickory_proto::op::{Message, OpCode, ResponseCode};
    use hickory_proto::rr::RecordType;
    use hickory_proto::serialize::binary::BinEncodable;
    use std::str::FromStr;

    /// Encode a DNS message with the given questions.
    pub(crate) fn dns_message(
        message_type: MessageType,
        code: ResponseCode,
        domains: &[&str],
    ) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(0x1234)
            .set_message_type(message_type)
            .set_op_code(OpCode::Query)
            .set_response_code(code);
        for domain in domains {
            message.add_query(Query::query(Name::from_str(domain).unwrap(), RecordType::A));
        }
        message.to_bytes().unwrap()
    }

    #[test]
    fn should_parse_single_question_response() {
        let bytes = dns_message(MessageType::Response, ResponseCode::NoError, &["good.com"]);
        let info = parse_dns_response(&bytes).unwrap();

        assert_eq!(info.domains(), &["good.com".to_string()]);
        assert_eq!(info.response_code(), 0);
    }

    #[test]
    fn should_keep_question_order_and_share_response_code() {
        let bytes = dns_message(
            MessageType::Response,
            ResponseCode::NXDomain,
            &["b.example", "a.example", "b.example"],
        );
        let info = parse_dns_response(&bytes).unwrap();

        assert_eq!(info.domains(), &["b.example", "a.example", "b.example"]);
        assert_eq!(info.response_code(), 3);
    }

    #[test]
    fn should_ignore_queries() {
        let bytes = dns_message(MessageType::Query, ResponseCode::NoError, &["good.com"]);
        assert_eq!(parse_dns_response(&bytes), None);
    }

    #[test]
    fn should_forward_response_without_questions() {
        let bytes = dns_message(MessageType::Response, ResponseCode::ServFail, &[]);
        let info = parse_dns_response(&bytes).unwrap();

        assert!(info.domains().is_empty());
        assert_eq!(info.response_code(), 2);
    }

    #[test]
    fn should_reject_short_header() {
        assert_eq!(parse_dns_response(&[0x12, 0x34, 0x81]), None);
        assert_eq!(parse_dns_response(&[]), None);
    }

    #[test]
    fn should_keep_names_decoded_before_truncation() {
        let bytes = dns_message(
            MessageType::Response,
            ResponseCode::NoError,
            &["first.com", "second.com"],
        );
        // header (12) + "first.com" (11) + type/class (4) + a few bytes of the next name
        let info = parse_dns_response(&bytes[..30]).unwrap();

        assert_eq!(info.domains(), &["first.com"]);
    }

    #[test]
    fn should_tolerate_garbage_after_questions() {
        let mut bytes = dns_message(MessageType::Response, ResponseCode::NoError, &["good.com"]);
        bytes.extend_from_slice(&[0xFF; 7]);

        let info = parse_dns_response(&bytes).unwrap();
        assert_eq!(info.domains(), &["good.com"]);
    }
}
