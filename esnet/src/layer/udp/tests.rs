use crate::layer::{Endpoint, Error};
use crate::testing::{datagram, icmp, parse, udp, Harness, HOST, PEER, SUBNET_BROADCAST};
use crate::wire::{icmpv4_packet, udp_packet, Checksum, Icmpv4DstUnreachable, Icmpv4Repr};
use crate::wire::{IpProtocol, UdpRepr, IPV4_HEADER_LEN};

fn from_peer(src_port: u16, dst: (crate::wire::Ipv4Address, u16), payload: &[u8]) -> Vec<u8> {
    datagram(PEER, dst.0, IpProtocol::Udp, &udp((PEER, src_port), dst, payload))
}

#[test]
fn bound_socket_receives() {
    let harness = Harness::new();
    let mut socket = harness.stack.datagram_socket();
    socket.bind(Endpoint::new(HOST, 7)).unwrap();

    harness.inject(&from_peer(4000, (HOST, 7), b"echo"));
    let mut buf = [0; 16];
    assert_eq!(socket.recv_from(&mut buf), Ok((4, Endpoint::new(PEER, 4000))));
    assert_eq!(&buf[..4], b"echo");
    assert_eq!(socket.recv_from(&mut buf), Err(Error::WouldBlock));
    assert!(harness.sent().is_empty());
}

#[test]
fn specific_address_before_wildcard() {
    let harness = Harness::new();
    let mut any = harness.stack.datagram_socket();
    any.bind(Endpoint::new(crate::wire::Ipv4Address::UNSPECIFIED, 53)).unwrap();
    let mut exact = harness.stack.datagram_socket();
    exact.bind(Endpoint::new(HOST, 53)).unwrap();

    harness.inject(&from_peer(1, (HOST, 53), b"a"));
    assert!(exact.is_readable());
    assert!(!any.is_readable());

    let mut again = harness.stack.datagram_socket();
    assert_eq!(again.bind(Endpoint::new(HOST, 53)), Err(Error::AddrInUse));
}

#[test]
fn port_unreachable() {
    let harness = Harness::new();
    let original = from_peer(4000, (HOST, 9), b"nobody");
    harness.inject(&original);

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let (ip, payload) = parse(&sent[0]);
    assert_eq!((ip.src_addr, ip.dst_addr), (HOST, PEER));
    let packet = icmpv4_packet::new_checked(payload).unwrap();
    match Icmpv4Repr::parse(packet, Checksum::Manual).unwrap() {
        Icmpv4Repr::DstUnreachable { reason, .. } =>
            assert_eq!(reason, Icmpv4DstUnreachable::PortUnreachable),
        other => panic!("unexpected {}", other),
    }
    assert_eq!(packet.payload_slice(), &original[..IPV4_HEADER_LEN + 8]);
}

#[test]
fn broadcast_reaches_every_socket_and_is_never_answered() {
    let harness = Harness::new();
    let mut first = harness.stack.datagram_socket();
    first.bind(Endpoint::new(crate::wire::Ipv4Address::UNSPECIFIED, 67)).unwrap();
    let mut second = harness.stack.datagram_socket();
    second.bind(Endpoint::new(HOST, 67)).unwrap();

    harness.inject(&from_peer(68, (SUBNET_BROADCAST, 67), b"discover"));
    assert!(first.is_readable());
    assert!(second.is_readable());

    harness.inject(&from_peer(68, (SUBNET_BROADCAST, 99), b"discover"));
    assert!(harness.sent().is_empty());
}

#[test]
fn send_fills_checksum() {
    let harness = Harness::new();
    let mut socket = harness.stack.datagram_socket();
    assert_eq!(socket.send_to(b"query", Endpoint::new(PEER, 53)), Ok(5));
    let local = socket.local_addr().unwrap();
    assert!(local.port >= harness.stack.config().ephemeral_start);

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let (ip, payload) = parse(&sent[0]);
    assert_eq!((ip.src_addr, ip.dst_addr), (HOST, PEER));
    let packet = udp_packet::new_checked(payload).unwrap();
    let repr = UdpRepr::parse(packet, HOST, PEER, Checksum::Manual).unwrap();
    assert_eq!(repr, UdpRepr { src_port: local.port, dst_port: 53, payload_len: 5 });
    assert_ne!(packet.checksum(), 0);
    assert_eq!(packet.payload_slice(), b"query");
}

#[test]
fn connected_socket_filters_and_learns_refusal() {
    let harness = Harness::new();
    let mut socket = harness.stack.datagram_socket();
    socket.connect(Endpoint::new(PEER, 53)).unwrap();
    let local = socket.local_addr().unwrap();

    harness.inject(&from_peer(54, (HOST, local.port), b"stranger"));
    assert!(!socket.is_readable());
    harness.inject(&from_peer(53, (HOST, local.port), b"answer"));
    assert!(socket.is_readable());

    socket.send(b"query").unwrap();
    let sent = harness.sent().remove(0);
    let quote = &sent[..IPV4_HEADER_LEN + 8];
    let report = Icmpv4Repr::DstUnreachable {
        reason: Icmpv4DstUnreachable::PortUnreachable,
        next_hop_mtu: 0,
        header: parse(&sent).0,
        data_len: quote.len(),
    };
    harness.inject(&datagram(PEER, HOST, IpProtocol::Icmp, &icmp(report, quote)));

    let mut buf = [0; 16];
    assert_eq!(socket.recv(&mut buf), Err(Error::ConnectionRefused));
    assert_eq!(socket.recv(&mut buf), Ok(6));
    assert_eq!(socket.take_error(), None);
}

#[test]
fn close_releases_port() {
    let harness = Harness::new();
    let mut socket = harness.stack.datagram_socket();
    socket.bind(Endpoint::new(HOST, 5353)).unwrap();
    socket.close();

    let ports = harness.stack.context().udp().unwrap().side_b().unwrap();
    assert!(ports.as_mux().unwrap().is_empty());
    let mut other = harness.stack.datagram_socket();
    assert_eq!(other.bind(Endpoint::new(HOST, 5353)), Ok(()));
}
