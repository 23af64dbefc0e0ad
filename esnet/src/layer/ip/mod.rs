//! The IP layer.
//!
//! ## Structure
//!
//! The IP node sits between the mux of interfaces on its A side and the mux of transport
//! protocols on its B side. Routing information lives in the [`Registry`]: the addresses and
//! subnets of the interfaces and the path MTU learned toward each peer. A second, detached tree
//! of muxes keyed by local address, remote address and identification holds the datagrams that
//! are being reassembled.
//!
//! ## Receiving packets
//!
//! The header is validated (version, lengths, checksum) and the destination checked against the
//! addresses of the receiving interface, including broadcasts. Trailing link padding is cut off
//! by the total length. Fragments are routed into the reassembly tree, everything else continues
//! toward B with the cursor on the transport header and the addressing of the messenger filled
//! in for the muxes above.
//!
//! ## Transmitting packets
//!
//! The interface is chosen by destination. An unset source address is taken from it. If the
//! datagram exceeds the smaller of the interface MTU and the path MTU it is split into fragments
//! whose payloads are multiples of eight octets, unless the sender forbade fragmentation.
//!
//! [`Registry`]: ../../registry/struct.Registry.html
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::conduit::{Conduit, Receiver, Side, Transporter};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::wire::{ipv4_packet, Checksum, IpProtocol, Ipv4Address, Ipv4Repr};
use crate::wire::{IPV4_HEADER_LEN, IPV4_MAX_DATAGRAM};

mod reass;

pub(crate) use self::reass::reassembly_tree;

/// The receiver of the IP node.
pub(crate) struct IpReceiver {
    ctx: Arc<Context>,
    reassembly: Arc<Conduit>,
    ident: AtomicU16,
}

impl IpReceiver {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        let reassembly = reassembly_tree(&ctx);
        IpReceiver {
            ctx,
            reassembly,
            ident: AtomicU16::new(1),
        }
    }

    fn next_ident(&self) -> u16 {
        self.ident.fetch_add(1, Ordering::Relaxed)
    }

    /// Split the datagram at the cursor of `m` into fragments.
    ///
    /// All but the last are emitted toward A here, the last replaces the contents of `m` and
    /// continues on the regular path. Returns false if nothing is left to send.
    fn fragment(&self, m: &mut InetMessenger, repr: Ipv4Repr, mtu: usize, c: &Arc<Conduit>)
        -> bool
    {
        let chunk = (mtu.saturating_sub(IPV4_HEADER_LEN)) & !7;
        if chunk == 0 {
            net_debug!("ip: mtu {} too small to fragment", mtu);
            return false;
        }

        let payload = m.messenger.payload().to_vec();
        let mut offset = 0;
        loop {
            let len = chunk.min(payload.len() - offset);
            let more_frags = offset + len < payload.len();
            let header = Ipv4Repr {
                payload_len: len,
                more_frags,
                frag_offset: offset as u16,
                ..repr
            };

            let mut frame = vec![0; IPV4_HEADER_LEN + len];
            frame[IPV4_HEADER_LEN..].copy_from_slice(&payload[offset..offset + len]);
            header.emit(ipv4_packet::new_unchecked_mut(&mut frame), self.ctx.checksum);
            net_trace!("ip: fragment {}+{} of {}", offset, len, repr.ident);

            if !more_frags {
                m.messenger = Messenger::from_slice(&frame);
                return true;
            }
            let mut fragment = InetMessenger::new(Messenger::from_slice(&frame), Op::Output);
            fragment.local = m.local.clone();
            fragment.remote = m.remote.clone();
            fragment.scope = m.scope;
            fragment.set_protocol(repr.protocol);
            c.forward(&mut Transporter::new(&mut fragment), Side::A);
            offset += len;
        }
    }
}

/// The addressing of a fragment whose total length is shorter than its header.
///
/// Such a fragment claims a negative payload. It is not a valid packet, yet it must still abort
/// the reassembly it belongs to.
fn teardrop(datagram: &[u8], checksum: Checksum)
    -> Option<(Ipv4Address, Ipv4Address, u16, IpProtocol)>
{
    let packet = ipv4_packet::new_unchecked(datagram);
    if packet.check_header_len().is_err() || packet.version() != 4 {
        return None;
    }
    let fragment = packet.more_frags() || packet.frag_offset() != 0;
    if !fragment || packet.total_len() >= u16::from(packet.header_len()) {
        return None;
    }
    if checksum.manual() && !packet.verify_checksum() {
        return None;
    }
    Some((packet.src_addr(), packet.dst_addr(), packet.ident(), packet.protocol()))
}

impl Receiver for IpReceiver {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let torn = teardrop(m.messenger.payload(), self.ctx.checksum);
        if let Some((src, dst, ident, protocol)) = torn {
            if self.ctx.registry.accepts(m.scope, dst) {
                net_debug!("ip: teardrop fragment {} from {}", ident, src);
                m.local = Some(self.ctx.registry.address(dst));
                m.remote = Some(self.ctx.registry.address(src));
                m.ident = ident;
                m.set_protocol(protocol);
                Transporter::new(m).send(&self.reassembly, Side::B);
            }
            return false;
        }

        let (repr, header_len) = {
            let packet = match ipv4_packet::new_checked(m.messenger.payload()) {
                Ok(packet) => packet,
                Err(err) => {
                    net_trace!("ip: dropping malformed packet: {}", err);
                    return false;
                },
            };
            match Ipv4Repr::parse(packet, self.ctx.checksum) {
                Ok(repr) => (repr, usize::from(packet.header_len())),
                Err(err) => {
                    net_trace!("ip: dropping invalid packet: {}", err);
                    return false;
                },
            }
        };

        if !self.ctx.registry.accepts(m.scope, repr.dst_addr) {
            net_trace!("ip: not for us: {}", repr);
            return false;
        }
        if repr.src_addr.is_broadcast() || repr.src_addr.is_multicast() {
            net_trace!("ip: dropping packet from {}", repr.src_addr);
            return false;
        }

        let start = m.messenger.position();
        m.messenger.set_len(start + header_len + repr.payload_len);
        m.local = Some(self.ctx.registry.address(repr.dst_addr));
        m.remote = Some(self.ctx.registry.address(repr.src_addr));
        m.ident = repr.ident;
        m.set_protocol(repr.protocol);

        if repr.is_fragment() {
            Transporter::new(m).send(&self.reassembly, Side::B);
            return false;
        }

        m.messenger.move_position(header_len as isize)
    }

    fn output(&self, m: &mut InetMessenger, c: &Arc<Conduit>) -> bool {
        let remote = m.remote_ip();
        let interface = match self.ctx.registry.route(remote) {
            Some(interface) => interface,
            None => {
                net_debug!("ip: no route to {}", remote);
                return false;
            },
        };
        if m.local_ip().is_unspecified() {
            m.local = Some(self.ctx.registry.address(interface.cidr.address()));
        }
        m.scope = interface.scope;

        let payload_len = m.messenger.length();
        if payload_len + IPV4_HEADER_LEN > IPV4_MAX_DATAGRAM {
            net_debug!("ip: datagram of {} bytes too long", payload_len);
            return false;
        }

        let path_mtu = m.remote.as_ref().and_then(|remote| remote.path_mtu());
        let mtu = path_mtu.map_or(interface.mtu, |path| path.min(interface.mtu));
        let repr = Ipv4Repr {
            src_addr: m.local_ip(),
            dst_addr: remote,
            protocol: m.protocol(),
            payload_len,
            hop_limit: self.ctx.config.ttl,
            ident: self.next_ident(),
            dont_frag: m.dont_frag,
            more_frags: false,
            frag_offset: 0,
        };

        if payload_len + IPV4_HEADER_LEN > mtu {
            if m.dont_frag {
                net_debug!("ip: {} exceeds mtu {} and may not be fragmented", repr, mtu);
                return false;
            }
            return self.fragment(m, repr, mtu, c);
        }

        if !m.messenger.move_position(-(IPV4_HEADER_LEN as isize)) {
            net_debug!("ip: no headroom for header");
            return false;
        }
        repr.emit(ipv4_packet::new_unchecked_mut(m.messenger.payload_mut()), self.ctx.checksum);
        net_trace!("ip: send {}", repr);
        true
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        true
    }
}
