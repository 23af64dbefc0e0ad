//! The ICMP layer.
//!
//! Echo requests are answered in place. Echo replies continue to the echo mux, keyed by the
//! remote address and the echo identifier, where ping sockets wait for them. Error messages are
//! turned into `Op::Error` messages describing the quoted datagram and reflected into the mux of
//! transport protocols, so that they reach exactly the connection or socket that sent it.
//!
//! Errors are also generated here, see [`report`]. Following RFC 1122 no error is sent about an
//! ICMP error, about a fragment other than the first, about a datagram sent to a broadcast or
//! multicast address, or to a source that is not a unicast address.
//!
//! [`report`]: fn.report.html
use std::sync::Arc;

use crate::conduit::{Conduit, IdentAccessor, Receiver, RemoteAddressAccessor, Side, Transporter};
use crate::layer::Error;
use crate::messenger::{ErrorCode, InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::wire::{icmpv4_packet, ipv4_packet, Checksum, IpProtocol, Ipv4Repr};
use crate::wire::{Icmpv4DstUnreachable, Icmpv4Message, Icmpv4Repr, Icmpv4TimeExceeded};
use crate::wire::{ICMPV4_HEADER_LEN, ICMPV4_ORIGINAL_DATA_LEN, IPV4_HEADER_LEN};

mod socket;

pub use self::socket::PingSocket;

/// Datagram sizes to try when a router reports a too small MTU without its value, RFC 1191.
const MTU_PLATEAUS: [usize; 10] = [32000, 17914, 8166, 4352, 2002, 1492, 1006, 508, 296, 68];

/// An error to report about a received datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Report {
    Unreachable(Icmpv4DstUnreachable),
    TimeExceeded(Icmpv4TimeExceeded),
    ParamProblem(u8),
}

/// How a transport treats an error report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Severity {
    /// The connection is aborted with this error.
    Hard(Error),
    /// The error is recorded and reported only if the connection fails for other reasons.
    Soft(Error),
    /// The path MTU was lowered, already recorded on the remote address.
    PathMtu,
    /// The sender should slow down.
    Quench,
}

/// Classify an error report following RFC 1122, section 4.2.3.9.
pub(crate) fn classify(code: &ErrorCode) -> Severity {
    match (code.message, Icmpv4DstUnreachable::from(code.code)) {
        (Icmpv4Message::DstUnreachable, Icmpv4DstUnreachable::ProtoUnreachable)
        | (Icmpv4Message::DstUnreachable, Icmpv4DstUnreachable::PortUnreachable) =>
            Severity::Hard(Error::ConnectionRefused),
        (Icmpv4Message::DstUnreachable, Icmpv4DstUnreachable::FragRequired) => Severity::PathMtu,
        (Icmpv4Message::DstUnreachable, _) => Severity::Soft(Error::Unreachable),
        (Icmpv4Message::SourceQuench, _) => Severity::Quench,
        (Icmpv4Message::TimeExceeded, _) => Severity::Soft(Error::Unreachable),
        _ => Severity::Soft(Error::Illegal),
    }
}

/// Build the ICMP node and the echo mux above it.
pub(crate) fn protocol(ctx: &Arc<Context>) -> (Arc<Conduit>, Arc<Conduit>) {
    let icmp = Conduit::protocol("icmp", Arc::new(IcmpReceiver { ctx: ctx.clone() }));
    let echo = Conduit::mux("echo", Arc::new(RemoteAddressAccessor));
    let idents = Conduit::mux("echo ident", Arc::new(IdentAccessor));
    echo.set_factory(Some(Conduit::factory("echo", Some(idents), None)));
    crate::conduit::connect_ab(&icmp, &echo);
    (icmp, echo)
}

/// The largest plateau below the length of the datagram that did not fit.
fn plateau_below(len: usize) -> usize {
    MTU_PLATEAUS.iter()
        .copied()
        .find(|&plateau| plateau < len)
        .unwrap_or(68)
}

/// Send an ICMP error about `datagram`, which starts with its IP header.
///
/// The datagram may be truncated after its header.
///
/// Returns whether a message was sent.
pub(crate) fn report(ctx: &Context, datagram: &[u8], report: Report) -> bool {
    // A quote from a reassembly is cut short, only its header must be complete.
    let packet = ipv4_packet::new_unchecked(datagram);
    if packet.check_header_len().is_err() {
        return false;
    }
    let header_len = usize::from(packet.header_len());
    let (src, dst) = (packet.src_addr(), packet.dst_addr());

    if packet.protocol() == IpProtocol::Icmp {
        let about_error = datagram.get(header_len)
            .map_or(true, |&kind| Icmpv4Message::from(kind).is_error());
        if about_error {
            return false;
        }
    }
    if packet.frag_offset() != 0
        || ctx.registry.is_broadcast(dst)
        || dst.is_multicast()
        || !src.is_unicast()
    {
        net_trace!("icmp: no report about {} -> {}", src, dst);
        return false;
    }

    let quoted = datagram.len().min(header_len + ICMPV4_ORIGINAL_DATA_LEN);
    let header = Ipv4Repr {
        src_addr: src,
        dst_addr: dst,
        protocol: packet.protocol(),
        payload_len: usize::from(packet.total_len()).saturating_sub(header_len),
        hop_limit: packet.hop_limit(),
        ident: packet.ident(),
        dont_frag: packet.dont_frag(),
        more_frags: packet.more_frags(),
        frag_offset: 0,
    };
    let repr = match report {
        Report::Unreachable(reason) => Icmpv4Repr::DstUnreachable {
            reason,
            next_hop_mtu: 0,
            header,
            data_len: quoted,
        },
        Report::TimeExceeded(reason) => Icmpv4Repr::TimeExceeded {
            reason,
            header,
            data_len: quoted,
        },
        Report::ParamProblem(pointer) => Icmpv4Repr::ParamProblem {
            pointer,
            header,
            data_len: quoted,
        },
    };

    let mut bytes = vec![0; repr.buffer_len()];
    bytes[ICMPV4_HEADER_LEN..].copy_from_slice(&datagram[..quoted]);
    repr.emit(icmpv4_packet::new_unchecked_mut(&mut bytes), Checksum::Ignored);

    let mut m = InetMessenger::new(Messenger::with_headroom(IPV4_HEADER_LEN, &bytes), Op::Output);
    if ctx.registry.is_local(dst) {
        m.local = Some(ctx.registry.address(dst));
    }
    m.remote = Some(ctx.registry.address(src));
    m.set_protocol(IpProtocol::Icmp);
    net_debug!("icmp: report {}", repr);
    match ctx.icmp() {
        Some(icmp) => Transporter::new(&mut m).send(&icmp, Side::A),
        None => false,
    }
}

/// The receiver of the ICMP node.
struct IcmpReceiver {
    ctx: Arc<Context>,
}

impl IcmpReceiver {
    fn answer_echo(&self, m: &InetMessenger, repr: Icmpv4Repr, c: &Arc<Conduit>) {
        if self.ctx.registry.is_broadcast(m.local_ip()) || m.local_ip().is_multicast() {
            net_trace!("icmp: not answering echo to {}", m.local_ip());
            return;
        }
        let reply = match repr.echo_reply() {
            Some(reply) => reply,
            None => return,
        };

        let mut bytes = m.messenger.payload().to_vec();
        reply.emit(icmpv4_packet::new_unchecked_mut(&mut bytes), Checksum::Ignored);
        let mut answer = InetMessenger::new(
            Messenger::with_headroom(IPV4_HEADER_LEN, &bytes),
            Op::Output);
        answer.local = m.local.clone();
        answer.remote = m.remote.clone();
        answer.set_protocol(IpProtocol::Icmp);
        net_trace!("icmp: {} to {}", reply, m.remote_ip());
        c.start(&mut Transporter::new(&mut answer), Side::A);
    }

    /// Reflect an error message toward the transport that sent the quoted datagram.
    fn reflect(&self, m: &InetMessenger, repr: Icmpv4Repr, quote: &[u8]) -> bool {
        let header = match repr.quoted_header() {
            Some(header) => header,
            None => return false,
        };
        if !self.ctx.registry.is_local(header.src_addr) {
            net_trace!("icmp: error about foreign datagram from {}", header.src_addr);
            return false;
        }
        let header_len = usize::from(ipv4_packet::new_unchecked(quote).header_len());

        let (message, code, mtu) = match repr {
            Icmpv4Repr::DstUnreachable { reason, next_hop_mtu, .. } =>
                (Icmpv4Message::DstUnreachable, u8::from(reason), next_hop_mtu),
            Icmpv4Repr::SourceQuench { .. } => (Icmpv4Message::SourceQuench, 0, 0),
            Icmpv4Repr::TimeExceeded { reason, .. } =>
                (Icmpv4Message::TimeExceeded, u8::from(reason), 0),
            Icmpv4Repr::ParamProblem { pointer, .. } =>
                (Icmpv4Message::ParamProblem, pointer, 0),
            _ => return false,
        };

        let remote = self.ctx.registry.address(header.dst_addr);
        let frag_required = u8::from(Icmpv4DstUnreachable::FragRequired);
        if message == Icmpv4Message::DstUnreachable && code == frag_required {
            let mtu = match usize::from(mtu) {
                0 => plateau_below(header.payload_len + header_len),
                mtu => mtu,
            };
            net_debug!("icmp: path mtu to {} is {}", remote, mtu);
            self.ctx.registry.set_path_mtu(&remote, mtu);
        }

        let mut error = InetMessenger::new(Messenger::from_slice(quote), Op::Error);
        error.messenger.set_position(header_len);
        error.local = Some(self.ctx.registry.address(header.src_addr));
        error.remote = Some(remote);
        error.set_protocol(header.protocol);
        error.scope = m.scope;
        error.error = Some(ErrorCode { message, code, mtu });
        net_debug!("icmp: {}", repr);
        match self.ctx.protocols() {
            Some(protocols) => Transporter::new(&mut error).send(&protocols, Side::B),
            None => false,
        }
    }
}

impl Receiver for IcmpReceiver {
    fn input(&self, m: &mut InetMessenger, c: &Arc<Conduit>) -> bool {
        let (repr, quote) = {
            let packet = match icmpv4_packet::new_checked(m.messenger.payload()) {
                Ok(packet) => packet,
                Err(err) => {
                    net_trace!("icmp: dropping malformed message: {}", err);
                    return false;
                },
            };
            match Icmpv4Repr::parse(packet, self.ctx.checksum) {
                Ok(repr) => (repr, packet.payload_slice().to_vec()),
                Err(err) => {
                    net_trace!("icmp: dropping invalid message: {}", err);
                    return false;
                },
            }
        };

        match repr {
            Icmpv4Repr::EchoRequest { .. } => {
                self.answer_echo(m, repr, c);
                false
            },
            Icmpv4Repr::EchoReply { ident, .. } => {
                m.ident = ident;
                true
            },
            _ => {
                self.reflect(m, repr, &quote);
                false
            },
        }
    }

    fn output(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        if m.messenger.length() < ICMPV4_HEADER_LEN {
            return false;
        }
        let packet = icmpv4_packet::new_unchecked_mut(m.messenger.payload_mut());
        if self.ctx.checksum.manual() {
            packet.fill_checksum();
        } else {
            packet.set_checksum(0);
        }
        true
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}

/// Answers datagrams of protocols nobody registered for.
pub(crate) struct ProtocolUnreachable {
    ctx: Arc<Context>,
}

impl ProtocolUnreachable {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        ProtocolUnreachable { ctx }
    }
}

impl Receiver for ProtocolUnreachable {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        net_trace!("icmp: no protocol {}", m.protocol());
        let unreachable = Icmpv4DstUnreachable::ProtoUnreachable;
        report(&self.ctx, m.messenger.as_slice(), Report::Unreachable(unreachable));
        false
    }

    fn output(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}
