mod header;

pub use header::{DNS_HEADER_LEN, DnsHeader};

use bytes::Bytes;
use thiserror::Error;

use crate::decode::Transport;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message too short for DNS header")]
    InvalidHeader,
    #[error("TCP length prefix exceeds payload")]
    InvalidLengthPrefix,
    #[error("invalid label in domain name")]
    InvalidLabel,
    #[error("question section truncated")]
    InvalidQuestionSection,
    #[error("bit stream error: {0}")]
    BitStream(#[from] std::io::Error),
}

/// A parsed DNS message.
///
/// The monitor core only interprets the header (in particular the QR bit);
/// the full wire bytes are retained verbatim for analyzers that want to dig
/// further.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub bytes: Bytes,
}

impl DnsMessage {
    /// Parse a transport payload as a DNS message.
    ///
    /// TCP payloads carry the RFC 1035 2-byte length prefix, which is
    /// stripped and checked here. Beyond the header, the question section
    /// is walked so that arbitrary traffic on port 53 is rejected rather
    /// than dispatched to analyzers. Never panics on malformed input.
    pub fn parse(payload: &[u8], transport: Transport) -> Result<Self, ParseError> {
        let body = match transport {
            Transport::Udp => payload,
            Transport::Tcp => {
                if payload.len() < 2 {
                    return Err(ParseError::InvalidHeader);
                }
                let declared = u16::from_be_bytes([payload[0], payload[1]]) as usize;
                let rest = &payload[2..];
                if rest.len() < declared {
                    return Err(ParseError::InvalidLengthPrefix);
                }
                &rest[..declared]
            }
        };

        let header = DnsHeader::read(body)?;

        let mut offset = DNS_HEADER_LEN;
        for _ in 0..header.qdcount {
            offset = skip_question(body, offset)?;
        }

        Ok(DnsMessage {
            header,
            bytes: Bytes::copy_from_slice(body),
        })
    }

    /// True for responses (QR=1).
    pub fn is_answer(&self) -> bool {
        self.header.qr
    }

    /// The first question's domain name, if the message carries one.
    pub fn qname(&self) -> Option<String> {
        if self.header.qdcount == 0 {
            return None;
        }
        let (labels, _) = read_name(&self.bytes, DNS_HEADER_LEN).ok()?;
        Some(labels.join("."))
    }
}

fn skip_question(data: &[u8], start: usize) -> Result<usize, ParseError> {
    let offset = skip_name(data, start)?;
    // QTYPE and QCLASS
    if offset + 4 > data.len() {
        return Err(ParseError::InvalidQuestionSection);
    }
    Ok(offset + 4)
}

/// Advance past an encoded domain name, validating label lengths.
/// A compression pointer terminates the name.
fn skip_name(data: &[u8], start: usize) -> Result<usize, ParseError> {
    let mut offset = start;
    loop {
        if offset >= data.len() {
            return Err(ParseError::InvalidLabel);
        }
        let len = data[offset];
        if len == 0 {
            return Ok(offset + 1);
        }
        if (len & 0xC0) == 0xC0 {
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidLabel);
            }
            return Ok(offset + 2);
        }
        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }
        offset += 1 + len as usize;
        if offset > data.len() {
            return Err(ParseError::InvalidLabel);
        }
    }
}

/// Decode a domain name at `start`, following compression pointers with a
/// bounded jump count.
fn read_name(data: &[u8], start: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut offset = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        if offset >= data.len() {
            return Err(ParseError::InvalidLabel);
        }
        let len = data[offset];

        if (len & 0xC0) == 0xC0 {
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidLabel);
            }
            if end.is_none() {
                end = Some(offset + 2);
            }
            offset = (((len as usize) & 0x3F) << 8) | data[offset + 1] as usize;
            jumps += 1;
            if jumps > 16 {
                return Err(ParseError::InvalidLabel);
            }
            continue;
        }

        if len == 0 {
            return Ok((labels, end.unwrap_or(offset + 1)));
        }
        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let label_start = offset + 1;
        let label_end = label_start + len as usize;
        if label_end > data.len() {
            return Err(ParseError::InvalidLabel);
        }
        labels.push(String::from_utf8_lossy(&data[label_start..label_end]).into_owned());
        offset = label_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a bare DNS query for the given name.
    fn build_query(name: &str, qr: bool) -> Vec<u8> {
        let mut buf = vec![
            0x12, 0x34, // id
            if qr { 0x80 } else { 0x00 },
            0x00, // flags
            0x00, 0x01, // qdcount
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0); // root
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
        buf
    }

    #[test]
    fn test_parse_udp_query() {
        let payload = build_query("example.com", false);
        let message = DnsMessage::parse(&payload, Transport::Udp).unwrap();
        assert!(!message.is_answer());
        assert_eq!(message.header.id, 0x1234);
        assert_eq!(message.qname().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_parse_tcp_with_length_prefix() {
        let inner = build_query("example.com", true);
        let mut payload = (inner.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(&inner);
        let message = DnsMessage::parse(&payload, Transport::Tcp).unwrap();
        assert!(message.is_answer());
    }

    #[test]
    fn test_tcp_length_prefix_mismatch() {
        let inner = build_query("example.com", false);
        let mut payload = ((inner.len() + 10) as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(&inner);
        assert!(matches!(
            DnsMessage::parse(&payload, Transport::Tcp),
            Err(ParseError::InvalidLengthPrefix)
        ));
    }

    #[test]
    fn test_reject_short_payload() {
        assert!(DnsMessage::parse(&[0x12, 0x34], Transport::Udp).is_err());
    }

    #[test]
    fn test_reject_garbage() {
        let garbage = [0xffu8; 100];
        assert!(DnsMessage::parse(&garbage, Transport::Udp).is_err());
    }

    #[test]
    fn test_reject_truncated_question() {
        let mut payload = build_query("example.com", false);
        payload.truncate(payload.len() - 3);
        assert!(DnsMessage::parse(&payload, Transport::Udp).is_err());
    }

    #[test]
    fn test_reject_oversized_label() {
        let mut payload = build_query("example.com", false);
        payload[12] = 0x7f; // label length > 63
        assert!(matches!(
            DnsMessage::parse(&payload, Transport::Udp),
            Err(ParseError::InvalidLabel)
        ));
    }

    #[test]
    fn test_compressed_name_terminates_walk() {
        // question name is a pointer back to offset 12 — contrived but legal
        let mut buf = vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        buf.extend_from_slice(&[0xC0, 0x0C]); // pointer to itself's start
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        // skip_name treats the pointer as terminating, so this parses
        let message = DnsMessage::parse(&buf, Transport::Udp).unwrap();
        assert_eq!(message.header.qdcount, 1);
    }
}
