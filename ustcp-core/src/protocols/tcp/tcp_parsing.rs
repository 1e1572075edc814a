use crate::protocols::{ipv4_address::Ipv4Address, utility::Checksum};
use thiserror::Error as ThisError;

/// The number of 32-bit words in a TCP header without optional header parts
const BASE_HEADER_WORDS: u8 = 5;
/// The number of bytes in a TCP header without optional header parts
pub const BASE_HEADER_OCTETS: usize = BASE_HEADER_WORDS as usize * 4;
/// The IP protocol number of TCP, as carried in the pseudo header
const PROTOCOL_NUMBER: u8 = 6;
/// Offset of the checksum field within the header
const CHECKSUM_OFFSET: usize = 16;

/// The data for a TCP header
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TcpHeader {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment (except when
    /// SYN is present). If SYN is present the sequence number is the initial
    /// sequence number (ISN) and the first data octet is ISN+1.
    pub seq: u32,
    /// If the ACK control bit is set this field contains the value of the next
    /// sequence number the sender of the segment is expecting to receive. Once
    /// a connection is established this is always sent.
    pub ack: u32,
    /// The number of 32-bit words in the TCP header
    pub data_offset: u8,
    /// Flags that adjust the how segments are handled
    pub ctl: Control,
    /// The number of data octets beginning with the one indicated in the
    /// acknowledgment field which the sender of this segment is willing to
    /// accept.
    pub wnd: u16,
    /// The urgent pointer. Read and written but never interpreted.
    pub urg: u16,
    /// The header checksum as carried on the wire
    pub checksum: u16,
}

impl TcpHeader {
    /// Parses a serialized TCP header into its constituent fields. Options are
    /// skipped over rather than rejected. The checksum is read but not
    /// verified, see [`compute_checksum`].
    pub fn from_bytes(packet: &[u8]) -> Result<Self, ParseError> {
        let mut bytes = packet.iter().copied();
        let mut next =
            || -> Result<u8, ParseError> { bytes.next().ok_or(ParseError::HeaderTooShort) };

        let src_port = u16::from_be_bytes([next()?, next()?]);
        let dst_port = u16::from_be_bytes([next()?, next()?]);
        let seq = u32::from_be_bytes([next()?, next()?, next()?, next()?]);
        let ack = u32::from_be_bytes([next()?, next()?, next()?, next()?]);

        let offset_reserved_control = [next()?, next()?];
        let data_offset = offset_reserved_control[0] >> 4;
        let ctl = Control::from(offset_reserved_control[1] & 0b11_1111);

        let wnd = u16::from_be_bytes([next()?, next()?]);
        let checksum = u16::from_be_bytes([next()?, next()?]);
        let urg = u16::from_be_bytes([next()?, next()?]);

        if data_offset < BASE_HEADER_WORDS {
            Err(ParseError::BadDataOffset(data_offset))?
        }
        if data_offset as usize * 4 > packet.len() {
            Err(ParseError::HeaderTooShort)?
        }

        Ok(TcpHeader {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset,
            ctl,
            wnd,
            urg,
            checksum,
        })
    }

    /// Size of the header in bytes, options included
    pub fn bytes(&self) -> usize {
        self.data_offset as usize * 4
    }

    /// Convert the header to its native serialized format, ready to attach to a
    /// packet and send over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_HEADER_OCTETS);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
        out
    }
}

/// Computes the checksum of a serialized segment (header, options and text)
/// as sent from `src_address` to `dst_address`. The checksum field of the
/// segment is treated as zero, so the result can be compared against the
/// field directly.
pub fn compute_checksum(
    segment: &[u8],
    src_address: Ipv4Address,
    dst_address: Ipv4Address,
) -> Result<u16, ParseError> {
    let length: u16 = segment
        .len()
        .try_into()
        .map_err(|_| ParseError::PacketTooLong)?;
    let mut checksum = Checksum::new();

    // Pseudo header
    checksum.add_u32(src_address.into());
    checksum.add_u32(dst_address.into());
    checksum.add_u8(0, PROTOCOL_NUMBER);
    checksum.add_u16(length);

    let before = segment.iter().take(CHECKSUM_OFFSET);
    let after = segment.iter().skip(CHECKSUM_OFFSET + 2);
    checksum.accumulate_remainder(before.chain(after).copied());
    Ok(checksum.as_u16())
}

/// An error that occurred while parsing a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes to constitute a TCP header")]
    HeaderTooShort,
    #[error("The packet length could not fit into a u16")]
    PacketTooLong,
    #[error("Data offset {0} is smaller than the minimum header size")]
    BadDataOffset(u8),
}

/// Used for building a serialized TCP header
#[derive(Debug)]
pub struct TcpHeaderBuilder(TcpHeader);

impl TcpHeaderBuilder {
    /// Initialize the TCP header with defaults and the given values
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(TcpHeader {
            src_port,
            dst_port,
            seq,
            wnd: 0,
            ack: 0,
            urg: 0,
            ctl: Control::default(),

            // Filled in by .build()
            data_offset: 0,
            checksum: 0,
        })
    }

    /// Set the window size
    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    /// Set the acknowledgement number
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl.set_ack(true);
        self
    }

    /// Set the psh bit up
    pub fn psh(mut self) -> Self {
        self.0.ctl.set_psh(true);
        self
    }

    /// Set the syn bit up
    pub fn syn(mut self) -> Self {
        self.0.ctl.set_syn(true);
        self
    }

    /// Set the fin bit up
    pub fn fin(mut self) -> Self {
        self.0.ctl.set_fin(true);
        self
    }

    /// Get the finished header, checksum included
    pub fn build(
        self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        mut text: impl Iterator<Item = u8>,
        text_len: usize,
    ) -> Result<TcpHeader, BuildHeaderError> {
        let mut checksum = Checksum::new();
        let length: u16 = (text_len + BASE_HEADER_OCTETS)
            .try_into()
            .map_err(|_| BuildHeaderError::OverlyLongPayload)?;
        checksum.accumulate_remainder(&mut text);

        let data_offset = BASE_HEADER_WORDS;

        // Pseudo header
        checksum.add_u32(src_address.into());
        checksum.add_u32(dst_address.into());
        checksum.add_u8(0, PROTOCOL_NUMBER);
        checksum.add_u16(length);

        // Header parts
        checksum.add_u16(self.0.src_port);
        checksum.add_u16(self.0.dst_port);
        checksum.add_u32(self.0.seq.to_be_bytes());
        checksum.add_u32(self.0.ack.to_be_bytes());
        checksum.add_u8(data_offset << 4, self.0.ctl.into());
        checksum.add_u16(self.0.wnd);
        checksum.add_u16(self.0.urg);

        let mut header = self.0;
        header.data_offset = data_offset;
        header.checksum = checksum.as_u16();
        Ok(header)
    }
}

/// An error that occurred while building a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildHeaderError {
    #[error("The TCP payload is longer than can fit into a single packet")]
    OverlyLongPayload,
}

/// The control bits of a TCP header
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    /// Create a new Control with the given bits
    pub const fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            fin as u8
                | (syn as u8) << 1
                | (rst as u8) << 2
                | (psh as u8) << 3
                | (ack as u8) << 4
                | (urg as u8) << 5,
        )
    }

    /// Get whether the urgent pointer field is significant
    pub const fn urg(self) -> bool {
        self.bit(5)
    }

    /// Get whether the acknowledgment field significant
    pub const fn ack(self) -> bool {
        self.bit(4)
    }

    /// Set whether the acknowledgment field significant
    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(4, state);
    }

    /// Get whether the push function is enabled
    pub const fn psh(self) -> bool {
        self.bit(3)
    }

    /// Set whether the push function is enabled
    pub fn set_psh(&mut self, state: bool) {
        self.set_bit(3, state);
    }

    /// Get whether to reset the connection
    pub const fn rst(self) -> bool {
        self.bit(2)
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(1)
    }

    /// Set whether to synchronize sequence numbers
    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(1, state);
    }

    /// Get whether there is no more data to send
    pub const fn fin(self) -> bool {
        self.bit(0)
    }

    /// Set whether there is no more data to send
    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(0, state);
    }

    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (self.urg(), "URG"),
            (self.ack(), "ACK"),
            (self.psh(), "PSH"),
            (self.rst(), "RST"),
            (self.syn(), "SYN"),
            (self.fin(), "FIN"),
        ];
        write!(f, "Control(")?;
        let mut wrote = false;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if wrote {
                write!(f, ", ")?;
            }
            wrote = true;
            write!(f, "{name}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = b"Hello, world!";
    const SRC_ADDRESS: Ipv4Address = Ipv4Address::LOCALHOST;
    const DST_ADDRESS: Ipv4Address = Ipv4Address::new([10, 0, 0, 7]);
    const SRC_PORT: u16 = 0xcafe;
    const DST_PORT: u16 = 0xbabe;
    const SEQUENCE: u32 = 123456789;
    const WINDOW: u16 = 1024;
    const ACKNOWLEDGEMENT: u32 = 10;

    fn build_expected() -> (etherparse::TcpHeader, Vec<u8>) {
        let expected = {
            let mut expected = etherparse::TcpHeader::new(SRC_PORT, DST_PORT, SEQUENCE, WINDOW);
            expected.acknowledgment_number = ACKNOWLEDGEMENT;
            expected.ack = true;
            expected.psh = true;
            expected.checksum = expected
                .calc_checksum_ipv4_raw(SRC_ADDRESS.into(), DST_ADDRESS.into(), PAYLOAD)
                .unwrap();
            expected
        };

        let serial = {
            let mut serial = vec![];
            expected.write(&mut serial).unwrap();
            serial
        };

        (expected, serial)
    }

    #[test]
    fn parses_packet() {
        let control = Control::new(false, true, true, false, false, false);

        let (expected, serial) = build_expected();
        let packet: Vec<u8> = serial.into_iter().chain(PAYLOAD.iter().cloned()).collect();

        let actual = TcpHeader::from_bytes(&packet).unwrap();

        assert_eq!(actual.src_port, SRC_PORT);
        assert_eq!(actual.dst_port, DST_PORT);
        assert_eq!(actual.seq, SEQUENCE);
        assert_eq!(actual.ack, ACKNOWLEDGEMENT);
        assert_eq!(actual.ctl, control);
        assert_eq!(actual.wnd, WINDOW);
        assert_eq!(actual.checksum, expected.checksum);
        assert_eq!(actual.urg, 0);
        assert_eq!(actual.bytes(), BASE_HEADER_OCTETS);
        assert!(!actual.ctl.urg());
        assert!(actual.ctl.ack());
        assert!(actual.ctl.psh());
        assert!(!actual.ctl.rst());
        assert!(!actual.ctl.syn());
        assert!(!actual.ctl.fin());

        assert_eq!(
            compute_checksum(&packet, SRC_ADDRESS, DST_ADDRESS),
            Ok(expected.checksum)
        );
    }

    #[test]
    fn builds_packet() {
        let (_, expected) = build_expected();

        let actual = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .wnd(WINDOW)
            .psh()
            .ack(ACKNOWLEDGEMENT)
            .build(
                SRC_ADDRESS,
                DST_ADDRESS,
                PAYLOAD.iter().cloned(),
                PAYLOAD.len(),
            )
            .unwrap()
            .serialize();

        assert_eq!(expected, actual);
    }

    #[test]
    fn rejects_short_headers() {
        let (_, serial) = build_expected();
        assert_eq!(
            TcpHeader::from_bytes(&serial[..19]),
            Err(ParseError::HeaderTooShort)
        );
        assert_eq!(TcpHeader::from_bytes(&[]), Err(ParseError::HeaderTooShort));
    }

    #[test]
    fn rejects_bad_data_offset() {
        let (_, mut serial) = build_expected();
        serial[12] = 4 << 4;
        assert_eq!(
            TcpHeader::from_bytes(&serial),
            Err(ParseError::BadDataOffset(4))
        );

        // Claims options that are not there
        serial[12] = 6 << 4;
        assert_eq!(
            TcpHeader::from_bytes(&serial),
            Err(ParseError::HeaderTooShort)
        );
    }

    #[test]
    fn skips_options() {
        let (_, mut serial) = build_expected();
        serial[12] = 6 << 4;
        serial.extend_from_slice(&[1, 1, 1, 0]);
        let header = TcpHeader::from_bytes(&serial).unwrap();
        assert_eq!(header.data_offset, 6);
        assert_eq!(header.bytes(), 24);
    }

    #[test]
    fn rejects_overly_long_payload() {
        let text = vec![0u8; u16::MAX as usize];
        let result = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE).build(
            SRC_ADDRESS,
            DST_ADDRESS,
            text.iter().cloned(),
            text.len(),
        );
        assert_eq!(result, Err(BuildHeaderError::OverlyLongPayload));
    }

    #[test]
    fn control_works() {
        let control = Control::new(true, false, true, false, true, false);
        assert!(control.urg());
        assert!(!control.ack());
        assert!(control.psh());
        assert!(!control.rst());
        assert!(control.syn());
        assert!(!control.fin());

        let control = {
            let mut control = Control::default();
            control.set_ack(true);
            control.set_syn(true);
            control.set_fin(true);
            control
        };
        assert!(!control.urg());
        assert!(control.ack());
        assert!(!control.psh());
        assert!(!control.rst());
        assert!(control.syn());
        assert!(control.fin());
        assert_eq!(format!("{control:?}"), "Control(ACK, SYN, FIN)");
    }
}
