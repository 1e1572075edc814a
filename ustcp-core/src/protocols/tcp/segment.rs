use super::tcp_parsing::{compute_checksum, ParseError, TcpHeader, BASE_HEADER_OCTETS};
use crate::protocols::{ipv4_address::Ipv4Address, utility::Endpoint};

/// One TCP segment: a header, the text it carries and the addresses it
/// travels between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: TcpHeader,
    pub text: Vec<u8>,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
    valid_checksum: bool,
}

impl Segment {
    /// Creates a segment from a header whose checksum was computed for the
    /// given text and addresses.
    pub fn new(
        header: TcpHeader,
        text: Vec<u8>,
        source: Ipv4Address,
        destination: Ipv4Address,
    ) -> Self {
        Self {
            header,
            text,
            source,
            destination,
            valid_checksum: true,
        }
    }

    /// Parses a segment received from `source` for `destination` and checks
    /// its checksum. A checksum mismatch is not an error, it is recorded in
    /// [`Segment::has_valid_checksum`].
    pub fn decode(
        bytes: &[u8],
        source: Ipv4Address,
        destination: Ipv4Address,
    ) -> Result<Self, ParseError> {
        let header = TcpHeader::from_bytes(bytes)?;
        let checksum = compute_checksum(bytes, source, destination)?;
        Ok(Self {
            header,
            text: bytes[header.bytes()..].to_vec(),
            source,
            destination,
            valid_checksum: checksum == header.checksum,
        })
    }

    /// Serializes the segment. The checksum is recomputed from the current
    /// contents and options are never written.
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header;
        header.data_offset = (BASE_HEADER_OCTETS / 4) as u8;
        header.checksum = 0;
        let mut out = header.serialize();
        out.extend_from_slice(&self.text);
        if let Ok(checksum) = compute_checksum(&out, self.source, self.destination) {
            out[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
        out
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.valid_checksum
    }

    /// The length of the segment data, including any control bits
    pub fn seg_len(&self) -> u32 {
        self.text.len() as u32 + self.header.ctl.syn() as u32 + self.header.ctl.fin() as u32
    }

    /// The last sequence number the segment occupies. For a segment with zero
    /// length this is the one before its sequence number.
    pub fn last_seq(&self) -> u32 {
        self.header.seq.wrapping_add(self.seg_len()).wrapping_sub(1)
    }

    /// The endpoint the segment was sent from
    pub fn source_endpoint(&self) -> Endpoint {
        Endpoint::new(self.source, self.header.src_port)
    }

    /// The endpoint the segment is addressed to
    pub fn destination_endpoint(&self) -> Endpoint {
        Endpoint::new(self.destination, self.header.dst_port)
    }
}
