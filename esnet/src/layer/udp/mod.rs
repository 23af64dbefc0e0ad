//! The UDP layer.
//!
//! Datagrams are demultiplexed by local port and then by local address, where a socket bound to
//! the unspecified address catches everything its more specific siblings do not. A datagram sent
//! to a broadcast address is delivered to every socket bound to its port. When no socket is bound
//! to a port the sender learns of it with an ICMP port unreachable, unless it sent to broadcast.
use std::sync::Arc;

use crate::conduit::{connect_ab, Broadcast, Conduit, Key, LocalAddressAccessor, LocalPortAccessor};
use crate::conduit::Receiver;
use crate::layer::icmp::{self, Report};
use crate::messenger::InetMessenger;
use crate::stack::Context;
use crate::wire::{udp_packet, Icmpv4DstUnreachable, UdpRepr, UDP_HEADER_LEN};

mod socket;
#[cfg(test)]
mod tests;

pub use self::socket::DatagramSocket;

/// Build the UDP node with its tree of ports and addresses.
pub(crate) fn protocol(ctx: &Arc<Context>) -> Arc<Conduit> {
    let unreachable: Arc<dyn Receiver> = Arc::new(PortUnreachable { ctx: ctx.clone() });

    let addresses = Conduit::mux("udp address", Arc::new(LocalAddressAccessor));
    addresses.set_factory(Some(Conduit::factory("udp", None, Some(unreachable.clone()))));
    let ports = Conduit::mux("udp port", Arc::new(LocalPortAccessor));
    ports.set_factory(Some(Conduit::factory("udp", Some(addresses), Some(unreachable))));

    let udp = Conduit::protocol("udp", Arc::new(UdpReceiver { ctx: ctx.clone() }));
    connect_ab(&udp, &ports);
    udp
}

/// The receiver of the UDP node.
struct UdpReceiver {
    ctx: Arc<Context>,
}

impl Receiver for UdpReceiver {
    fn input(&self, m: &mut InetMessenger, c: &Arc<Conduit>) -> bool {
        let (repr, len) = {
            let packet = match udp_packet::new_checked(m.messenger.payload()) {
                Ok(packet) => packet,
                Err(err) => {
                    net_trace!("udp: dropping malformed datagram: {}", err);
                    return false;
                },
            };
            match UdpRepr::parse(packet, m.remote_ip(), m.local_ip(), self.ctx.checksum) {
                Ok(repr) => (repr, usize::from(packet.len())),
                Err(err) => {
                    net_trace!("udp: dropping invalid datagram: {}", err);
                    return false;
                },
            }
        };

        m.local_port = repr.dst_port;
        m.remote_port = repr.src_port;
        let start = m.messenger.position();
        m.messenger.set_len(start + len);
        m.messenger.move_position(UDP_HEADER_LEN as isize);

        if self.ctx.registry.is_broadcast(m.local_ip()) || m.local_ip().is_multicast() {
            let branch = c.side_b().and_then(|ports| ports.child(&Key::Port(repr.dst_port)));
            if let Some(branch) = branch {
                let delivered = Broadcast::new(m).deliver(&branch);
                net_trace!("udp: broadcast to port {} reached {}", repr.dst_port, delivered);
            }
            return false;
        }
        true
    }

    fn output(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        if m.local_ip().is_unspecified() {
            match self.ctx.source_for(m.remote_ip()) {
                Ok(local) => m.local = Some(self.ctx.registry.address(local)),
                Err(_) => {
                    net_debug!("udp: no route to {}", m.remote_ip());
                    return false;
                },
            }
        }
        let (local, remote) = (m.local_ip(), m.remote_ip());
        if udp_packet::new_checked(m.messenger.payload()).is_err() {
            return false;
        }
        let packet = udp_packet::new_unchecked_mut(m.messenger.payload_mut());
        if self.ctx.checksum.manual() {
            packet.fill_checksum(local, remote);
        } else {
            packet.set_checksum(0);
        }
        true
    }

    fn error(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        // Only the first eight octets were quoted, the length field points past them.
        let header = match m.messenger.fix_here(UDP_HEADER_LEN) {
            Some(header) => udp_packet::new_unchecked(header),
            None => return false,
        };
        m.local_port = header.src_port();
        m.remote_port = header.dst_port();
        true
    }
}

/// Answers datagrams for ports nobody listens on.
struct PortUnreachable {
    ctx: Arc<Context>,
}

impl Receiver for PortUnreachable {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        net_trace!("udp: nothing bound to port {}", m.local_port);
        let unreachable = Icmpv4DstUnreachable::PortUnreachable;
        icmp::report(&self.ctx, m.messenger.as_slice(), Report::Unreachable(unreachable));
        false
    }

    fn output(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}
