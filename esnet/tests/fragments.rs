//! Reassembly is independent of the order fragments arrive in.
use std::sync::Arc;

use proptest::prelude::*;

use esnet::{Config, Endpoint, Stack};
use esnet::nic::loopback::Loopback;
use esnet::time::ManualClock;
use esnet::wire::{ipv4_packet, udp_packet, Checksum, IpProtocol, Ipv4Address, Ipv4Cidr};
use esnet::wire::{Ipv4Repr, UdpRepr, IPV4_HEADER_LEN, UDP_HEADER_LEN};

const HOST: Ipv4Address = Ipv4Address::new(192, 168, 7, 1);
const PEER: Ipv4Address = Ipv4Address::new(192, 168, 7, 2);

fn udp(payload: &[u8]) -> Vec<u8> {
    let repr = UdpRepr { src_port: 1234, dst_port: 7, payload_len: payload.len() };
    let mut bytes = vec![0; UDP_HEADER_LEN + payload.len()];
    bytes[UDP_HEADER_LEN..].copy_from_slice(payload);
    repr.emit(udp_packet::new_unchecked_mut(&mut bytes), PEER, HOST, Checksum::Manual);
    bytes
}

/// Split `datagram` into fragments of `chunk` octets, the last possibly shorter.
fn fragments(datagram: &[u8], chunk: usize, ident: u16) -> Vec<Vec<u8>> {
    datagram.chunks(chunk).enumerate().map(|(i, part)| {
        let offset = i * chunk;
        let repr = Ipv4Repr {
            src_addr: PEER,
            dst_addr: HOST,
            protocol: IpProtocol::Udp,
            payload_len: part.len(),
            hop_limit: 64,
            ident,
            dont_frag: false,
            more_frags: offset + part.len() < datagram.len(),
            frag_offset: offset as u16,
        };
        let mut frame = vec![0; IPV4_HEADER_LEN + part.len()];
        frame[IPV4_HEADER_LEN..].copy_from_slice(part);
        repr.emit(ipv4_packet::new_unchecked_mut(&mut frame), Checksum::Manual);
        frame
    }).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_order_reassembles(
        data in proptest::collection::vec(any::<u8>(), 1..400),
        eighths in 1usize..8,
        order in Just((0..64).collect::<Vec<usize>>()).prop_shuffle(),
        ident in any::<u16>(),
    ) {
        let clock = Arc::new(ManualClock::new());
        let stack = Stack::with_clock(Config::default(), clock);
        let (nic, _wire) = Loopback::pair(1500);
        stack.add_interface(nic.clone(), Ipv4Cidr::new(HOST, 24)).unwrap();
        let mut socket = stack.datagram_socket();
        socket.bind(Endpoint::new(HOST, 7)).unwrap();

        let datagram = udp(&data);
        let mut parts: Vec<_> = fragments(&datagram, eighths * 8, ident)
            .into_iter()
            .zip(order.iter())
            .collect();
        parts.sort_by_key(|(_, key)| **key);
        for (frame, _) in parts.iter() {
            nic.inject(frame);
        }
        stack.poll();

        let mut buf = vec![0; 512];
        let (len, from) = socket.recv_from(&mut buf).unwrap();
        prop_assert_eq!(from, Endpoint::new(PEER, 1234));
        prop_assert_eq!(&buf[..len], &data[..]);
    }
}
