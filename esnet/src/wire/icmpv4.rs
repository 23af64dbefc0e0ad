use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Checksum, Result};
use super::ip::checksum;
use super::{Ipv4Repr, ipv4_packet, IPV4_HEADER_LEN};

/// Length of the fixed header common to all messages.
pub const HEADER_LEN: usize = field::HEADER_END;

/// Number of octets of the offending datagram's payload that error messages carry.
pub const ORIGINAL_DATA_LEN: usize = 8;

enum_with_unknown! {
    /// Internet protocol control message type.
    pub doc enum Message(u8) {
        /// Echo reply
        EchoReply      =  0,
        /// Destination unreachable
        DstUnreachable =  3,
        /// Source quench
        SourceQuench   =  4,
        /// Message redirect
        Redirect       =  5,
        /// Echo request
        EchoRequest    =  8,
        /// Time exceeded
        TimeExceeded   = 11,
        /// Parameter problem
        ParamProblem   = 12,
        /// Timestamp
        Timestamp      = 13,
        /// Timestamp reply
        TimestampReply = 14,
    }
}

impl Message {
    /// Whether this type reports an error about another datagram.
    pub fn is_error(self) -> bool {
        match self {
            Message::DstUnreachable
            | Message::SourceQuench
            | Message::Redirect
            | Message::TimeExceeded
            | Message::ParamProblem => true,
            _ => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::EchoReply      => write!(f, "echo reply"),
            Message::DstUnreachable => write!(f, "destination unreachable"),
            Message::SourceQuench   => write!(f, "source quench"),
            Message::Redirect       => write!(f, "message redirect"),
            Message::EchoRequest    => write!(f, "echo request"),
            Message::TimeExceeded   => write!(f, "time exceeded"),
            Message::ParamProblem   => write!(f, "parameter problem"),
            Message::Timestamp      => write!(f, "timestamp"),
            Message::TimestampReply => write!(f, "timestamp reply"),
            Message::Unknown(id)    => write!(f, "{}", id)
        }
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Destination Unreachable".
    pub doc enum DstUnreachable(u8) {
        /// Destination network unreachable
        NetUnreachable   =  0,
        /// Destination host unreachable
        HostUnreachable  =  1,
        /// Destination protocol unreachable
        ProtoUnreachable =  2,
        /// Destination port unreachable
        PortUnreachable  =  3,
        /// Fragmentation required, and DF flag set
        FragRequired     =  4,
        /// Source route failed
        SrcRouteFailed   =  5,
        /// Destination network unknown
        DstNetUnknown    =  6,
        /// Destination host unknown
        DstHostUnknown   =  7,
        /// Source host isolated
        SrcHostIsolated  =  8,
        /// Network administratively prohibited
        NetProhibited    =  9,
        /// Host administratively prohibited
        HostProhibited   = 10,
        /// Network unreachable for ToS
        NetUnreachToS    = 11,
        /// Host unreachable for ToS
        HostUnreachToS   = 12,
        /// Communication administratively prohibited
        CommProhibited   = 13,
        /// Host precedence violation
        HostPrecedViol   = 14,
        /// Precedence cutoff in effect
        PrecedCutoff     = 15
    }
}

impl fmt::Display for DstUnreachable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DstUnreachable::NetUnreachable =>
                write!(f, "destination network unreachable"),
            DstUnreachable::HostUnreachable =>
                write!(f, "destination host unreachable"),
            DstUnreachable::ProtoUnreachable =>
                write!(f, "destination protocol unreachable"),
            DstUnreachable::PortUnreachable =>
                write!(f, "destination port unreachable"),
            DstUnreachable::FragRequired =>
                write!(f, "fragmentation required, and DF flag set"),
            DstUnreachable::SrcRouteFailed =>
                write!(f, "source route failed"),
            DstUnreachable::DstNetUnknown =>
                write!(f, "destination network unknown"),
            DstUnreachable::DstHostUnknown =>
                write!(f, "destination host unknown"),
            DstUnreachable::SrcHostIsolated =>
                write!(f, "source host isolated"),
            DstUnreachable::NetProhibited =>
                write!(f, "network administratively prohibited"),
            DstUnreachable::HostProhibited =>
                write!(f, "host administratively prohibited"),
            DstUnreachable::NetUnreachToS =>
                write!(f, "network unreachable for ToS"),
            DstUnreachable::HostUnreachToS =>
                write!(f, "host unreachable for ToS"),
            DstUnreachable::CommProhibited =>
                write!(f, "communication administratively prohibited"),
            DstUnreachable::HostPrecedViol =>
                write!(f, "host precedence violation"),
            DstUnreachable::PrecedCutoff =>
                write!(f, "precedence cutoff in effect"),
            DstUnreachable::Unknown(id) =>
                write!(f, "{}", id)
        }
    }
}

enum_with_unknown! {
    /// Internet protocol control message subtype for type "Time Exceeded".
    pub doc enum TimeExceeded(u8) {
        /// TTL expired in transit
        TtlExpired  = 0,
        /// Fragment reassembly time exceeded
        FragExpired = 1
    }
}

byte_wrapper! {
    /// A byte sequence representing an ICMPv4 message.
    #[derive(Debug, PartialEq, Eq)]
    pub struct icmpv4([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub const TYPE:       usize = 0;
    pub const CODE:       usize = 1;
    pub const CHECKSUM:   Field = 2..4;

    pub const UNUSED:     Field = 4..8;

    pub const ECHO_IDENT: Field = 4..6;
    pub const ECHO_SEQNO: Field = 6..8;

    pub const POINTER:    usize = 4;
    pub const NEXT_MTU:   Field = 6..8;

    pub const HEADER_END: usize = 8;
}

impl icmpv4 {
    /// Imbue a raw octet buffer with ICMPv4 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &icmpv4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with ICMPv4 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut icmpv4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(data: &[u8]) -> Result<&icmpv4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Unwrap the packet as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::HEADER_END {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the message type field.
    #[inline]
    pub fn msg_type(&self) -> Message {
        Message::from(self.0[field::TYPE])
    }

    /// Return the message code field.
    #[inline]
    pub fn msg_code(&self) -> u8 {
        self.0[field::CODE]
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the identifier field (for echo request and reply packets).
    #[inline]
    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_IDENT])
    }

    /// Return the sequence number field (for echo request and reply packets).
    #[inline]
    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_SEQNO])
    }

    /// Return the next-hop MTU of a "fragmentation required" message.
    ///
    /// Zero when the reporting router predates RFC 1191.
    #[inline]
    pub fn next_hop_mtu(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::NEXT_MTU])
    }

    /// Return the octet offset pointer of a parameter problem message.
    #[inline]
    pub fn pointer(&self) -> u8 {
        self.0[field::POINTER]
    }

    /// Validate the checksum over the whole message.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(self.as_bytes()) == !0
    }

    /// Set the message type field.
    #[inline]
    pub fn set_msg_type(&mut self, value: Message) {
        self.0[field::TYPE] = value.into();
    }

    /// Set the message code field.
    #[inline]
    pub fn set_msg_code(&mut self, value: u8) {
        self.0[field::CODE] = value;
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value);
    }

    /// Set the identifier field (for echo request and reply packets).
    #[inline]
    pub fn set_echo_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::ECHO_IDENT], value);
    }

    /// Set the sequence number field (for echo request and reply packets).
    #[inline]
    pub fn set_echo_seq_no(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::ECHO_SEQNO], value);
    }

    /// Zero the four octets following the checksum.
    pub fn clear_rest_of_header(&mut self) {
        for b in &mut self.0[field::UNUSED] {
            *b = 0;
        }
    }

    /// Set the next-hop MTU of a "fragmentation required" message.
    #[inline]
    pub fn set_next_hop_mtu(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::NEXT_MTU], value);
    }

    /// Set the octet offset pointer of a parameter problem message.
    #[inline]
    pub fn set_pointer(&mut self, value: u8) {
        self.0[field::POINTER] = value;
    }

    /// Compute and fill in the checksum.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = !checksum::data(&self.0);
        self.set_checksum(checksum);
    }

    /// Return the payload as a byte slice.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::HEADER_END..]
    }

    /// Return the payload as a mutable byte slice.
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[field::HEADER_END..]
    }
}

impl AsRef<[u8]> for icmpv4 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an Internet Control Message Protocol version 4 message.
///
/// Error messages carry the header of the datagram they report on, as far as it could be
/// recovered from the quoted bytes. `data_len` counts the quoted octets following the ICMP
/// header: the original IP header plus at least eight octets of its payload.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr {
    EchoRequest {
        ident:  u16,
        seq_no: u16,
        payload_len: usize,
    },
    EchoReply {
        ident:  u16,
        seq_no: u16,
        payload_len: usize,
    },
    DstUnreachable {
        reason: DstUnreachable,
        next_hop_mtu: u16,
        header: Ipv4Repr,
        data_len: usize,
    },
    SourceQuench {
        header: Ipv4Repr,
        data_len: usize,
    },
    TimeExceeded {
        reason: TimeExceeded,
        header: Ipv4Repr,
        data_len: usize,
    },
    ParamProblem {
        pointer: u8,
        header: Ipv4Repr,
        data_len: usize,
    },
}

/// Recover the header of a quoted datagram.
///
/// The quote is cut after eight payload octets so the total length field points past its end.
/// Only the header itself and the eight octets are required.
fn parse_quoted(data: &[u8]) -> Result<Ipv4Repr> {
    if data.len() < IPV4_HEADER_LEN {
        return Err(Error::Truncated)
    }
    let packet = ipv4_packet::new_unchecked(data);
    if packet.version() != 4 || usize::from(packet.header_len()) < IPV4_HEADER_LEN {
        return Err(Error::Malformed)
    }
    let header_len = usize::from(packet.header_len());
    if data.len() < header_len + ORIGINAL_DATA_LEN {
        return Err(Error::Truncated)
    }
    Ok(Ipv4Repr {
        src_addr: packet.src_addr(),
        dst_addr: packet.dst_addr(),
        protocol: packet.protocol(),
        payload_len: usize::from(packet.total_len()).saturating_sub(header_len),
        hop_limit: packet.hop_limit(),
        ident: packet.ident(),
        dont_frag: packet.dont_frag(),
        more_frags: packet.more_frags(),
        frag_offset: packet.frag_offset(),
    })
}

impl Repr {
    /// Get the echo reply request if this is an echo request.
    pub fn echo_reply(self) -> Option<Repr> {
        match self {
            Repr::EchoRequest { ident, seq_no, payload_len, } =>
                Some(Repr::EchoReply { ident, seq_no, payload_len, }),
            _ => None,
        }
    }

    /// The header of the datagram an error message reports on.
    pub fn quoted_header(&self) -> Option<Ipv4Repr> {
        match *self {
            Repr::DstUnreachable { header, .. }
            | Repr::SourceQuench { header, .. }
            | Repr::TimeExceeded { header, .. }
            | Repr::ParamProblem { header, .. } => Some(header),
            _ => None,
        }
    }

    /// Parse an Internet Control Message Protocol version 4 packet and return
    /// a high-level representation.
    pub fn parse(packet: &icmpv4, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;
        // Valid checksum is expected.
        if checksum.manual() && !packet.verify_checksum() { return Err(Error::WrongChecksum) }

        let data_len = packet.payload_slice().len();
        match (packet.msg_type(), packet.msg_code()) {
            (Message::EchoRequest, 0) => {
                Ok(Repr::EchoRequest {
                    ident:  packet.echo_ident(),
                    seq_no: packet.echo_seq_no(),
                    payload_len: data_len,
                })
            },
            (Message::EchoReply, 0) => {
                Ok(Repr::EchoReply {
                    ident:  packet.echo_ident(),
                    seq_no: packet.echo_seq_no(),
                    payload_len: data_len,
                })
            },
            (Message::DstUnreachable, code) => {
                Ok(Repr::DstUnreachable {
                    reason: DstUnreachable::from(code),
                    next_hop_mtu: packet.next_hop_mtu(),
                    header: parse_quoted(packet.payload_slice())?,
                    data_len,
                })
            },
            (Message::SourceQuench, 0) => {
                Ok(Repr::SourceQuench {
                    header: parse_quoted(packet.payload_slice())?,
                    data_len,
                })
            },
            (Message::TimeExceeded, code) => {
                Ok(Repr::TimeExceeded {
                    reason: TimeExceeded::from(code),
                    header: parse_quoted(packet.payload_slice())?,
                    data_len,
                })
            },
            (Message::ParamProblem, 0) => {
                Ok(Repr::ParamProblem {
                    pointer: packet.pointer(),
                    header: parse_quoted(packet.payload_slice())?,
                    data_len,
                })
            },
            (Message::Unknown(_), _) => Err(Error::Unrecognized),
            _ => Err(Error::Malformed),
        }
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        match *self {
            Repr::EchoRequest { payload_len, .. }
            | Repr::EchoReply { payload_len, .. } => field::HEADER_END + payload_len,
            Repr::DstUnreachable { data_len, .. }
            | Repr::SourceQuench { data_len, .. }
            | Repr::TimeExceeded { data_len, .. }
            | Repr::ParamProblem { data_len, .. } => field::HEADER_END + data_len,
        }
    }

    /// Emit a high-level representation into an Internet Control Message Protocol version 4
    /// packet.
    ///
    /// The payload (echo data or the quoted datagram) must already be in place when the checksum
    /// is `Manual` since the checksum covers it.
    pub fn emit(&self, packet: &mut icmpv4, checksum: Checksum) {
        packet.set_msg_code(0);
        packet.clear_rest_of_header();
        match *self {
            Repr::EchoRequest { ident, seq_no, .. } => {
                packet.set_msg_type(Message::EchoRequest);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
            },
            Repr::EchoReply { ident, seq_no, .. } => {
                packet.set_msg_type(Message::EchoReply);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
            },
            Repr::DstUnreachable { reason, next_hop_mtu, .. } => {
                packet.set_msg_type(Message::DstUnreachable);
                packet.set_msg_code(reason.into());
                packet.set_next_hop_mtu(next_hop_mtu);
            },
            Repr::SourceQuench { .. } => {
                packet.set_msg_type(Message::SourceQuench);
            },
            Repr::TimeExceeded { reason, .. } => {
                packet.set_msg_type(Message::TimeExceeded);
                packet.set_msg_code(reason.into());
            },
            Repr::ParamProblem { pointer, .. } => {
                packet.set_msg_type(Message::ParamProblem);
                packet.set_pointer(pointer);
            },
        }

        if checksum.manual() {
            packet.fill_checksum()
        } else {
            packet.set_checksum(0);
        }
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Repr::EchoRequest { ident, seq_no, payload_len } =>
                write!(f, "ICMPv4 echo request id={} seq={} len={}",
                       ident, seq_no, payload_len),
            Repr::EchoReply { ident, seq_no, payload_len } =>
                write!(f, "ICMPv4 echo reply id={} seq={} len={}",
                       ident, seq_no, payload_len),
            Repr::DstUnreachable { reason, next_hop_mtu, header, .. } =>
                write!(f, "ICMPv4 {} mtu={} ({})", reason, next_hop_mtu, header),
            Repr::SourceQuench { header, .. } =>
                write!(f, "ICMPv4 source quench ({})", header),
            Repr::TimeExceeded { reason, header, .. } =>
                write!(f, "ICMPv4 time exceeded {:?} ({})", reason, header),
            Repr::ParamProblem { pointer, header, .. } =>
                write!(f, "ICMPv4 parameter problem at {} ({})", pointer, header),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::{IpProtocol, Ipv4Address};

    static ECHO_PACKET_BYTES: [u8; 12] =
        [0x08, 0x00, 0x8e, 0xfe,
         0x12, 0x34, 0xab, 0xcd,
         0xaa, 0x00, 0x00, 0xff];

    static ECHO_DATA_BYTES: [u8; 4] =
        [0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn test_echo_deconstruct() {
        let packet = icmpv4::new_unchecked(&ECHO_PACKET_BYTES[..]);
        assert_eq!(packet.msg_type(), Message::EchoRequest);
        assert_eq!(packet.msg_code(), 0);
        assert_eq!(packet.checksum(), 0x8efe);
        assert_eq!(packet.echo_ident(), 0x1234);
        assert_eq!(packet.echo_seq_no(), 0xabcd);
        assert_eq!(packet.payload_slice(), &ECHO_DATA_BYTES[..]);
        assert_eq!(packet.verify_checksum(), true);
    }

    fn echo_packet_repr() -> Repr {
        Repr::EchoRequest {
            ident: 0x1234,
            seq_no: 0xabcd,
            payload_len: ECHO_DATA_BYTES.len(),
        }
    }

    #[test]
    fn test_echo_parse() {
        let packet = icmpv4::new_unchecked(&ECHO_PACKET_BYTES[..]);
        let repr = Repr::parse(packet, Checksum::Manual).unwrap();
        assert_eq!(repr, echo_packet_repr());
    }

    #[test]
    fn test_echo_emit() {
        let repr = echo_packet_repr();
        let mut bytes = vec![0xa5; repr.buffer_len()];
        let packet = icmpv4::new_unchecked_mut(&mut bytes);
        packet.payload_mut_slice().copy_from_slice(&ECHO_DATA_BYTES[..]);
        repr.emit(packet, Checksum::Manual);
        assert_eq!(&bytes[..], &ECHO_PACKET_BYTES[..]);
    }

    #[test]
    fn test_check_len() {
        let bytes = [0x0b, 0x00, 0x00, 0x00,
                     0x00, 0x00, 0x00, 0x00];
        assert_eq!(icmpv4::new_checked(&[]), Err(Error::Truncated));
        assert_eq!(icmpv4::new_checked(&bytes[..4]), Err(Error::Truncated));
        assert!(icmpv4::new_checked(&bytes[..]).is_ok());
    }

    fn quoted_datagram() -> Vec<u8> {
        let header = Ipv4Repr {
            src_addr: Ipv4Address::new(10, 0, 0, 1),
            dst_addr: Ipv4Address::new(10, 0, 0, 2),
            protocol: IpProtocol::Udp,
            payload_len: 1000,
            hop_limit: 64,
            ident: 3,
            dont_frag: true,
            more_frags: false,
            frag_offset: 0,
        };
        // Header plus eight octets; the total length field still claims 1020.
        let mut bytes = vec![0; IPV4_HEADER_LEN + ORIGINAL_DATA_LEN];
        let mut full = vec![0; IPV4_HEADER_LEN + 1000];
        header.emit(ipv4_packet::new_unchecked_mut(&mut full), Checksum::Manual);
        bytes.copy_from_slice(&full[..IPV4_HEADER_LEN + ORIGINAL_DATA_LEN]);
        bytes
    }

    #[test]
    fn test_frag_required_roundtrip() {
        let quote = quoted_datagram();
        let mut bytes = vec![0; HEADER_LEN + quote.len()];
        let packet = icmpv4::new_unchecked_mut(&mut bytes);
        packet.payload_mut_slice().copy_from_slice(&quote);
        let repr = Repr::DstUnreachable {
            reason: DstUnreachable::FragRequired,
            next_hop_mtu: 576,
            header: parse_quoted(&quote).unwrap(),
            data_len: quote.len(),
        };
        repr.emit(packet, Checksum::Manual);

        let parsed = Repr::parse(icmpv4::new_checked(&bytes).unwrap(), Checksum::Manual).unwrap();
        assert_eq!(parsed, repr);
        let header = parsed.quoted_header().unwrap();
        assert_eq!(header.payload_len, 1000);
        assert_eq!(header.dst_addr, Ipv4Address::new(10, 0, 0, 2));
    }

    #[test]
    fn test_short_quote_rejected() {
        let quote = quoted_datagram();
        let mut bytes = vec![0; HEADER_LEN + IPV4_HEADER_LEN + 4];
        let packet = icmpv4::new_unchecked_mut(&mut bytes);
        packet.payload_mut_slice().copy_from_slice(&quote[..IPV4_HEADER_LEN + 4]);
        packet.set_msg_type(Message::TimeExceeded);
        packet.fill_checksum();
        assert_eq!(Repr::parse(icmpv4::new_unchecked(&bytes), Checksum::Manual),
                   Err(Error::Truncated));
    }
}
