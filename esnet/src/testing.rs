//! Fixtures for the unit tests: a stack on a manual clock, wired to a loopback device whose far
//! end the test plays.
use std::iter;
use std::sync::Arc;

use crate::config::Config;
use crate::nic::loopback::Loopback;
use crate::nic::Device;
use crate::stack::Stack;
use crate::time::{Duration, ManualClock};
use crate::wire::{icmpv4_packet, ipv4_packet, udp_packet, Checksum, Icmpv4Repr, IpProtocol};
use crate::wire::{Ipv4Address, Ipv4Cidr, Ipv4Repr, UdpRepr, ICMPV4_HEADER_LEN, UDP_HEADER_LEN};

pub(crate) const HOST: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
pub(crate) const PEER: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
pub(crate) const SUBNET_BROADCAST: Ipv4Address = Ipv4Address::new(10, 0, 0, 255);

pub(crate) struct Harness {
    pub(crate) stack: Stack,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) wire: Arc<Loopback>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Harness::with_config(Config::default(), 1500)
    }

    pub(crate) fn with_config(config: Config, mtu: usize) -> Self {
        let clock = Arc::new(ManualClock::new());
        let stack = Stack::with_clock(config, clock.clone());
        let (nic, wire) = Loopback::pair(mtu);
        stack.add_interface(nic, Ipv4Cidr::new(HOST, 24)).unwrap();
        Harness { stack, clock, wire }
    }

    /// Deliver a frame from the peer.
    pub(crate) fn inject(&self, frame: &[u8]) {
        self.wire.send(frame).unwrap();
        self.stack.poll();
    }

    /// All frames the stack sent since the last call.
    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        iter::from_fn(|| self.wire.try_recv()).collect()
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.stack.poll();
    }
}

/// An unfragmented datagram with a valid header checksum.
pub(crate) fn datagram(src: Ipv4Address, dst: Ipv4Address, protocol: IpProtocol, payload: &[u8])
    -> Vec<u8>
{
    let repr = Ipv4Repr {
        src_addr: src,
        dst_addr: dst,
        protocol,
        payload_len: payload.len(),
        hop_limit: 64,
        ident: 0x1234,
        dont_frag: false,
        more_frags: false,
        frag_offset: 0,
    };
    let mut frame = vec![0; repr.buffer_len() + payload.len()];
    frame[repr.buffer_len()..].copy_from_slice(payload);
    repr.emit(ipv4_packet::new_unchecked_mut(&mut frame), Checksum::Manual);
    frame
}

/// Parse a sent frame into its header and payload.
pub(crate) fn parse(frame: &[u8]) -> (Ipv4Repr, &[u8]) {
    let packet = ipv4_packet::new_checked(frame).unwrap();
    let repr = Ipv4Repr::parse(packet, Checksum::Manual).unwrap();
    let start = usize::from(packet.header_len());
    (repr, &frame[start..start + repr.payload_len])
}

/// An ICMP message whose payload, echo data or a quote, follows the header.
pub(crate) fn icmp(repr: Icmpv4Repr, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0; ICMPV4_HEADER_LEN + payload.len()];
    bytes[ICMPV4_HEADER_LEN..].copy_from_slice(payload);
    repr.emit(icmpv4_packet::new_unchecked_mut(&mut bytes), Checksum::Manual);
    bytes
}

/// A UDP datagram with a valid checksum.
pub(crate) fn udp(src: (Ipv4Address, u16), dst: (Ipv4Address, u16), payload: &[u8]) -> Vec<u8> {
    let repr = UdpRepr {
        src_port: src.1,
        dst_port: dst.1,
        payload_len: payload.len(),
    };
    let mut bytes = vec![0; UDP_HEADER_LEN + payload.len()];
    bytes[UDP_HEADER_LEN..].copy_from_slice(payload);
    repr.emit(udp_packet::new_unchecked_mut(&mut bytes), src.0, dst.0, Checksum::Manual);
    bytes
}
