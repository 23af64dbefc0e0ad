//! Two stacks talking over a pair of loopback devices, driven by hand.
use std::sync::Arc;

use esnet::{Config, Endpoint, Error, Stack, State};
use esnet::nic::loopback::Loopback;
use esnet::time::{Duration, ManualClock};
use esnet::wire::{Ipv4Address, Ipv4Cidr};

const A: Ipv4Address = Ipv4Address::new(10, 1, 0, 1);
const B: Ipv4Address = Ipv4Address::new(10, 1, 0, 2);

struct Pair {
    a: Stack,
    b: Stack,
    clock_a: Arc<ManualClock>,
    clock_b: Arc<ManualClock>,
    wire_b: Arc<Loopback>,
}

impl Pair {
    fn new() -> Self {
        let (clock_a, clock_b) = (Arc::new(ManualClock::new()), Arc::new(ManualClock::new()));
        let a = Stack::with_clock(Config::default(), clock_a.clone());
        let b = Stack::with_clock(Config::default(), clock_b.clone());
        let (nic_a, nic_b) = Loopback::pair(1500);
        a.add_interface(nic_a, Ipv4Cidr::new(A, 24)).unwrap();
        b.add_interface(nic_b.clone(), Ipv4Cidr::new(B, 24)).unwrap();
        Pair { a, b, clock_a, clock_b, wire_b: nic_b }
    }

    /// Deliver frames back and forth until both sides are quiet.
    fn settle(&self) {
        for _ in 0..64 {
            if self.a.poll() + self.b.poll() == 0 {
                return;
            }
        }
        panic!("stacks did not settle");
    }

    fn advance(&self, by: Duration) {
        self.clock_a.advance(by);
        self.clock_b.advance(by);
        self.settle();
    }
}

#[test]
fn stream_exchange_and_close() {
    let pair = Pair::new();
    let mut listener = pair.a.stream_socket();
    listener.bind(Endpoint::new(Ipv4Address::UNSPECIFIED, 80)).unwrap();
    listener.listen(4).unwrap();
    assert_eq!(listener.accept().err(), Some(Error::WouldBlock));

    let mut client = pair.b.stream_socket();
    client.connect(Endpoint::new(A, 80)).unwrap();
    assert_eq!(client.state(), State::SynSent);
    pair.settle();
    assert_eq!(client.state(), State::Established);

    let mut server = listener.accept().unwrap();
    assert_eq!(server.peer_addr(), client.local_addr());
    assert_eq!(server.local_addr(), Some(Endpoint::new(A, 80)));

    assert_eq!(client.write(b"GET / HTTP/1.0\r\n\r\n"), Ok(18));
    pair.settle();
    let mut buf = [0; 64];
    assert_eq!(server.read(&mut buf), Ok(18));
    assert_eq!(&buf[..4], b"GET ");

    assert_eq!(server.write(b"HTTP/1.0 200 OK\r\n\r\n"), Ok(19));
    server.close();
    pair.settle();
    assert_eq!(client.read(&mut buf), Ok(19));
    assert_eq!(client.read(&mut buf), Ok(0));
    assert_eq!(client.state(), State::CloseWait);

    client.close();
    pair.settle();
    assert_eq!(client.state(), State::Closed);
    pair.advance(Duration::from_secs(600));
}

#[test]
fn lost_segment_is_retransmitted() {
    let pair = Pair::new();
    let mut listener = pair.a.stream_socket();
    listener.bind(Endpoint::new(A, 22)).unwrap();
    listener.listen(1).unwrap();
    let mut client = pair.b.stream_socket();
    client.connect(Endpoint::new(A, 22)).unwrap();
    pair.settle();
    let mut server = listener.accept().unwrap();

    pair.wire_b.set_filter(|_| false);
    assert_eq!(client.write(b"lost"), Ok(4));
    pair.settle();
    let mut buf = [0; 8];
    assert_eq!(server.read(&mut buf), Err(Error::WouldBlock));

    pair.wire_b.clear_filter();
    pair.advance(Duration::from_secs(4));
    assert_eq!(server.read(&mut buf), Ok(4));
    assert_eq!(&buf[..4], b"lost");
}

#[test]
fn refused_connection() {
    let pair = Pair::new();
    let mut client = pair.b.stream_socket();
    client.connect(Endpoint::new(A, 9)).unwrap();
    pair.settle();
    assert_eq!(client.state(), State::Closed);
    assert_eq!(client.take_error(), Some(Error::ConnectionRefused));
}

#[test]
fn datagrams_and_ping() {
    let pair = Pair::new();
    let mut server = pair.a.datagram_socket();
    server.bind(Endpoint::new(A, 53)).unwrap();
    let mut client = pair.b.datagram_socket();
    client.connect(Endpoint::new(A, 53)).unwrap();

    assert_eq!(client.send(b"query"), Ok(5));
    pair.settle();
    let mut buf = [0; 16];
    let (len, from) = server.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"query");
    assert_eq!(server.send_to(b"answer", from), Ok(6));
    pair.settle();
    assert_eq!(client.recv(&mut buf), Ok(6));

    let ping = pair.b.ping_socket(A).unwrap();
    ping.send(1, b"are you there").unwrap();
    pair.settle();
    assert_eq!(ping.recv(), Ok((1, b"are you there".to_vec())));
}

#[test]
fn closed_udp_port_reported() {
    let pair = Pair::new();
    let mut client = pair.b.datagram_socket();
    client.connect(Endpoint::new(A, 4444)).unwrap();
    assert_eq!(client.send(b"anyone?"), Ok(7));
    pair.settle();
    assert_eq!(client.take_error(), Some(Error::ConnectionRefused));
}
