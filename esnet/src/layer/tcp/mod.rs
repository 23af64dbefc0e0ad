//! The TCP layer.
//!
//! Connections are demultiplexed by local port, local address, remote port and remote address,
//! in that order. A stream that is only bound sits under the `Any` keys of the remote levels and
//! so catches segments for its port that no connection claims, answering them with resets.
//!
//! Listening streams live in a separate tree keyed by local port and local address. When a
//! segment matches no connection the factory receiver of the connection tree consults it and
//! hands the segment to the listener, which may create a new connection for it. Segments that
//! match neither are answered with a reset, RFC 793 "Reset Generation".
//!
//! ## Structure
//!
//! The protocol logic works on a [`Tcb`], the connection record, that never touches the graph.
//! Arrival of a segment and expiry of a timer update the record and report what happened, the
//! segments to send are then pulled one by one. A [`Stream`] owns the record behind a lock and
//! does the sending after releasing it, so that a segment looping back into the stack does not
//! find the lock taken.
//!
//! The state machine follows RFC 793 with the corrections of RFC 1122. Congestion control is
//! NewReno (RFC 5681, RFC 6582) with limited transmit (RFC 3042) and, when both sides offer it,
//! loss recovery driven by selective acknowledgments (RFC 2018, RFC 6675).
//!
//! ## Deviations
//!
//! There is no window scaling and no timestamp option, the window is thus limited to 64KB. Urgent
//! data is marked in the stream but not delivered out of band.
//!
//! [`Tcb`]: tcb/struct.Tcb.html
//! [`Stream`]: stream/struct.Stream.html
use std::sync::Arc;

use crate::conduit::{connect_ab, Conduit, Key, LocalAddressAccessor, LocalPortAccessor};
use crate::conduit::{Receiver, RemoteAddressAccessor, RemotePortAccessor, Side, Transporter};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::wire::{tcp_packet, Checksum, IpProtocol, Ipv4Address, TcpRepr};
use crate::wire::{IPV4_HEADER_LEN, IPV4_MIN_MTU, TCP_HEADER_LEN};

mod input;
mod output;
mod scoreboard;
mod siphash;
mod socket;
mod stream;
mod tcb;
mod timer;
#[cfg(test)]
mod tests;

pub use self::siphash::IsnGenerator;
pub use self::socket::StreamSocket;
pub use self::tcb::State;

use self::tcb::reset_for;

/// Build the TCP node with its connection tree, and the tree of listeners.
pub(crate) fn protocol(ctx: &Arc<Context>) -> (Arc<Conduit>, Arc<Conduit>) {
    let unmatched: Arc<dyn Receiver> = Arc::new(Unmatched { ctx: ctx.clone() });

    let remote_addresses = Conduit::mux("tcp remote address", Arc::new(RemoteAddressAccessor));
    remote_addresses.set_factory(Some(Conduit::factory("tcp", None, Some(unmatched.clone()))));
    let remote_ports = Conduit::mux("tcp remote port", Arc::new(RemotePortAccessor));
    remote_ports.set_factory(Some(
        Conduit::factory("tcp", Some(remote_addresses), Some(unmatched.clone()))));
    let addresses = Conduit::mux("tcp address", Arc::new(LocalAddressAccessor));
    addresses.set_factory(Some(
        Conduit::factory("tcp", Some(remote_ports), Some(unmatched.clone()))));
    let ports = Conduit::mux("tcp port", Arc::new(LocalPortAccessor));
    ports.set_factory(Some(Conduit::factory("tcp", Some(addresses), Some(unmatched))));

    let tcp = Conduit::protocol("tcp", Arc::new(TcpReceiver { ctx: ctx.clone() }));
    connect_ab(&tcp, &ports);

    let listen_addresses = Conduit::mux("tcp listen address", Arc::new(LocalAddressAccessor));
    listen_addresses.set_factory(Some(Conduit::factory("tcp listen", None, None)));
    let listeners = Conduit::mux("tcp listen port", Arc::new(LocalPortAccessor));
    listeners.set_factory(Some(Conduit::factory("tcp listen", Some(listen_addresses), None)));

    (tcp, listeners)
}

/// The receiver of the TCP node.
struct TcpReceiver {
    ctx: Arc<Context>,
}

impl Receiver for TcpReceiver {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        // Connections are between unicast addresses only.
        if self.ctx.registry.is_broadcast(m.local_ip()) || m.local_ip().is_multicast() {
            net_trace!("tcp: dropping segment to {}", m.local_ip());
            return false;
        }
        let repr = {
            let packet = match tcp_packet::new_checked(m.messenger.payload()) {
                Ok(packet) => packet,
                Err(err) => {
                    net_trace!("tcp: dropping malformed segment: {}", err);
                    return false;
                },
            };
            match TcpRepr::parse(packet, m.remote_ip(), m.local_ip(), self.ctx.checksum) {
                Ok(repr) => repr,
                Err(err) => {
                    net_trace!("tcp: dropping invalid segment: {}", err);
                    return false;
                },
            }
        };
        m.local_port = repr.dst_port;
        m.remote_port = repr.src_port;
        true
    }

    fn output(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        if m.local_ip().is_unspecified() {
            match self.ctx.source_for(m.remote_ip()) {
                Ok(local) => m.local = Some(self.ctx.registry.address(local)),
                Err(_) => {
                    net_debug!("tcp: no route to {}", m.remote_ip());
                    return false;
                },
            }
        }
        let (local, remote) = (m.local_ip(), m.remote_ip());
        if tcp_packet::new_checked(m.messenger.payload()).is_err() {
            return false;
        }
        let packet = tcp_packet::new_unchecked_mut(m.messenger.payload_mut());
        if self.ctx.checksum.manual() {
            packet.fill_checksum(local, remote);
        } else {
            packet.set_checksum(0);
        }
        true
    }

    fn error(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        // The quote holds at least the ports and the sequence number.
        let header = match m.messenger.fix_here(8) {
            Some(header) => header,
            None => return false,
        };
        m.local_port = u16::from_be_bytes([header[0], header[1]]);
        m.remote_port = u16::from_be_bytes([header[2], header[3]]);
        true
    }
}

/// Segments that match no connection go to a listener, or are answered with a reset.
struct Unmatched {
    ctx: Arc<Context>,
}

impl Receiver for Unmatched {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let local_ip = m.local_ip();
        let local_port = m.local_port;
        let listener = self.ctx.listeners()
            .and_then(|ports| ports.as_mux()?.lookup(&Key::port(local_port)))
            .and_then(|addresses| addresses.as_mux()?.lookup(&Key::address(local_ip)));
        if let Some(listener) = listener {
            // The listener installs its connections itself, the lookup must not be retried.
            Transporter::new(m).send(&listener, Side::B);
            return false;
        }

        if let Some((repr, _)) = segment(m) {
            net_trace!("tcp: no connection for {}:{}, {}", local_ip, local_port, repr);
            if let Some(reset) = reset_for(&repr) {
                send(&self.ctx, &reset, &[], local_ip, m.remote_ip(), false);
            }
        }
        false
    }

    fn output(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}

/// The header and payload of the segment at the cursor, already validated by the TCP node.
fn segment(m: &InetMessenger) -> Option<(TcpRepr, &[u8])> {
    let packet = tcp_packet::new_checked(m.messenger.payload()).ok()?;
    let repr = TcpRepr::parse(packet, m.remote_ip(), m.local_ip(), Checksum::Ignored).ok()?;
    Some((repr, packet.payload_slice()))
}

/// Send one segment through the TCP node. Returns whether it left the node.
fn send(ctx: &Context, repr: &TcpRepr, payload: &[u8], local: Ipv4Address, remote: Ipv4Address,
    dont_frag: bool) -> bool
{
    let tcp = match ctx.tcp() {
        Some(tcp) => tcp,
        None => return false,
    };
    let mut repr = *repr;
    repr.payload_len = payload.len();
    let mut bytes = vec![0; repr.buffer_len()];
    repr.emit(tcp_packet::new_unchecked_mut(&mut bytes));
    bytes[repr.header_len()..].copy_from_slice(payload);

    let mut m = InetMessenger::new(Messenger::with_headroom(IPV4_HEADER_LEN, &bytes), Op::Output);
    if !local.is_unspecified() {
        m.local = Some(ctx.registry.address(local));
    }
    m.remote = Some(ctx.registry.address(remote));
    m.local_port = repr.src_port;
    m.remote_port = repr.dst_port;
    m.set_protocol(IpProtocol::Tcp);
    m.dont_frag = dont_frag;
    Transporter::new(&mut m).send(&tcp, Side::A)
}

/// The segment size to announce to `remote`, from the MTU of the route and the path.
fn local_mss(ctx: &Context, remote: Ipv4Address) -> usize {
    let mtu = ctx.registry.route(remote).map_or(IPV4_MIN_MTU, |interface| interface.mtu);
    let mtu = ctx.registry.address(remote).path_mtu().map_or(mtu, |path| path.min(mtu));
    mtu.saturating_sub(IPV4_HEADER_LEN + TCP_HEADER_LEN).max(1)
}
