use bitstream_io::{BigEndian, BitRead, BitReader};

use super::ParseError;

pub const DNS_HEADER_LEN: usize = 12;

/// The fixed 12-byte DNS message header (RFC 1035 §4.1.1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub fn read(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < DNS_HEADER_LEN {
            return Err(ParseError::InvalidHeader);
        }

        let mut reader = BitReader::<_, BigEndian>::new(&buf[0..DNS_HEADER_LEN]);
        let mut header = DnsHeader::default();
        header.id = reader.read_var::<u16>(16)?;
        header.qr = reader.read_var::<u8>(1)? == 1;
        header.opcode = reader.read_var::<u8>(4)?;
        header.aa = reader.read_var::<u8>(1)? == 1;
        header.tc = reader.read_var::<u8>(1)? == 1;
        header.rd = reader.read_var::<u8>(1)? == 1;
        header.ra = reader.read_var::<u8>(1)? == 1;
        header.z = reader.read_var::<u8>(3)?;
        header.rcode = reader.read_var::<u8>(4)?;
        header.qdcount = reader.read_var::<u16>(16)?;
        header.ancount = reader.read_var::<u16>(16)?;
        header.nscount = reader.read_var::<u16>(16)?;
        header.arcount = reader.read_var::<u16>(16)?;
        Ok(header)
    }
}
