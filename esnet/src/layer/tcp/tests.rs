//! Tcp layer tests.
//!
//! The tests play the peer on the far end of the loopback wire: they inject hand-built segments
//! and look at every segment the stack sends in return.
use crate::config::Config;
use crate::layer::{Endpoint, Error};
use crate::testing::{datagram, icmp, parse, Harness, HOST, PEER};
use crate::time::Duration;
use crate::wire::{tcp_packet, Checksum, Icmpv4DstUnreachable, Icmpv4Repr, IpProtocol};
use crate::wire::{Ipv4Address, TcpFlags, TcpRepr, TcpSeqNumber, IPV4_HEADER_LEN};

use super::{State, StreamSocket};

fn seq(n: u32) -> TcpSeqNumber {
    TcpSeqNumber::from_u32(n)
}

fn repr(src_port: u16, dst_port: u16, flags: TcpFlags, seq_number: u32, ack: Option<u32>)
    -> TcpRepr
{
    TcpRepr {
        src_port,
        dst_port,
        flags,
        seq_number: seq(seq_number),
        ack_number: ack.map(seq),
        window_len: 4096,
        urgent_at: 0,
        max_seg_size: None,
        sack_permitted: false,
        sack_ranges: [None; 3],
        payload_len: 0,
    }
}

/// A frame carrying a segment from the peer.
fn from_peer(repr: TcpRepr, payload: &[u8]) -> Vec<u8> {
    let mut repr = repr;
    repr.payload_len = payload.len();
    let mut bytes = vec![0; repr.buffer_len()];
    repr.emit(tcp_packet::new_unchecked_mut(&mut bytes));
    bytes[repr.header_len()..].copy_from_slice(payload);
    tcp_packet::new_unchecked_mut(&mut bytes).fill_checksum(PEER, HOST);
    datagram(PEER, HOST, IpProtocol::Tcp, &bytes)
}

fn decode(frame: &[u8]) -> (TcpRepr, Vec<u8>) {
    let (ip, payload) = parse(frame);
    assert_eq!(ip.protocol, IpProtocol::Tcp);
    assert_eq!((ip.src_addr, ip.dst_addr), (HOST, PEER));
    let packet = tcp_packet::new_checked(payload).unwrap();
    let repr = TcpRepr::parse(packet, ip.src_addr, ip.dst_addr, Checksum::Manual).unwrap();
    (repr, packet.payload_slice().to_vec())
}

/// Every segment sent since the last call.
fn segments(harness: &Harness) -> Vec<(TcpRepr, Vec<u8>)> {
    harness.sent().iter().map(|frame| decode(frame)).collect()
}

/// Connect to the peer's port 80. The peer answers with `syn_ack`, modified by `adjust`, and its
/// sequence numbers start at 1000.
///
/// Returns the socket, its port and our next sequence number.
fn establish<F>(harness: &Harness, adjust: F) -> (StreamSocket, u16, u32)
    where F: FnOnce(&mut TcpRepr)
{
    let mut socket = harness.stack.stream_socket();
    socket.connect(Endpoint::new(PEER, 80)).unwrap();
    let port = socket.local_addr().unwrap().port;
    let sent = segments(harness);
    assert_eq!(sent.len(), 1);
    let iss = sent[0].0.seq_number.to_u32();

    let mut syn_ack = repr(80, port, TcpFlags::SYN, 1000, Some(iss.wrapping_add(1)));
    syn_ack.max_seg_size = Some(1460);
    adjust(&mut syn_ack);
    harness.inject(&from_peer(syn_ack, &[]));
    assert_eq!(socket.state(), State::Established);

    let ack = segments(harness);
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].0.ack_number, Some(seq(1001)));
    assert_eq!(ack[0].0.seq_number, seq(iss.wrapping_add(1)));
    (socket, port, iss.wrapping_add(1))
}

#[test]
fn active_open_transfer_and_time_wait() {
    let harness = Harness::new();
    let mut socket = harness.stack.stream_socket();
    socket.connect(Endpoint::new(PEER, 80)).unwrap();
    assert_eq!(socket.state(), State::SynSent);
    assert!(!socket.is_connectable());

    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    let syn = sent[0].0;
    assert!(syn.flags.syn());
    assert_eq!(syn.ack_number, None);
    assert_eq!(syn.dst_port, 80);
    assert_eq!(syn.max_seg_size, Some(1460));
    assert!(syn.sack_permitted);
    drop(socket);

    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |_| ());
    assert!(socket.is_connectable());
    assert_eq!(socket.peer_addr(), Some(Endpoint::new(PEER, 80)));

    assert_eq!(socket.write(b"hello"), Ok(5));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert!(sent[0].0.flags.psh());
    assert_eq!(sent[0].1, b"hello");

    // A single segment is acknowledged after the delay.
    let data = repr(80, port, TcpFlags::default(), 1001, Some(nxt.wrapping_add(5)));
    harness.inject(&from_peer(data, b"world"));
    assert!(segments(&harness).is_empty());
    harness.advance(Duration::from_millis(200));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(seq(1006)));

    let mut buf = [0; 16];
    assert_eq!(socket.read(&mut buf), Ok(5));
    assert_eq!(&buf[..5], b"world");
    assert_eq!(socket.read(&mut buf), Err(Error::WouldBlock));

    socket.shutdown_output().unwrap();
    assert_eq!(socket.state(), State::FinWait1);
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.fin());
    assert_eq!(sent[0].0.seq_number, seq(nxt.wrapping_add(5)));
    assert_eq!(socket.write(b"late"), Err(Error::Shutdown));

    harness.inject(&from_peer(repr(80, port, TcpFlags::FIN, 1006, Some(nxt.wrapping_add(6))), &[]));
    assert_eq!(socket.state(), State::TimeWait);
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(seq(1007)));
    assert_eq!(socket.read(&mut buf), Ok(0));

    harness.advance(Duration::from_secs(239));
    assert_eq!(socket.state(), State::TimeWait);
    harness.advance(Duration::from_secs(1));
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), None);

    // The connection is gone, its peer now gets resets.
    let segment = repr(80, port, TcpFlags::default(), 1007, Some(nxt.wrapping_add(6)));
    harness.inject(&from_peer(segment, &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.rst());
    assert_eq!(sent[0].0.seq_number, seq(nxt.wrapping_add(6)));
    assert_eq!(sent[0].0.ack_number, None);
}

#[test]
fn passive_close() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |_| ());

    harness.inject(&from_peer(repr(80, port, TcpFlags::FIN, 1001, Some(nxt)), &[]));
    assert_eq!(socket.state(), State::CloseWait);
    assert_eq!(segments(&harness)[0].0.ack_number, Some(seq(1002)));
    let mut buf = [0; 4];
    assert_eq!(socket.read(&mut buf), Ok(0));

    // Writing is still allowed after the peer's FIN.
    assert_eq!(socket.write(b"bye"), Ok(3));
    socket.shutdown_output().unwrap();
    assert_eq!(socket.state(), State::LastAck);
    let sent = segments(&harness);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, b"bye");
    assert!(sent[1].0.flags.fin());
    assert_eq!(sent[1].0.seq_number, seq(nxt.wrapping_add(3)));

    let segment = repr(80, port, TcpFlags::default(), 1002, Some(nxt.wrapping_add(4)));
    harness.inject(&from_peer(segment, &[]));
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), None);
    assert!(segments(&harness).is_empty());
}

#[test]
fn listener_accepts_within_backlog() {
    let harness = Harness::new();
    let mut listener = harness.stack.stream_socket();
    listener.bind(Endpoint::new(Ipv4Address::UNSPECIFIED, 80)).unwrap();
    listener.listen(1).unwrap();
    assert_eq!(listener.state(), State::Listen);
    assert_eq!(listener.accept().err(), Some(Error::WouldBlock));

    let mut other = harness.stack.stream_socket();
    assert_eq!(other.bind(Endpoint::new(Ipv4Address::UNSPECIFIED, 80)), Err(Error::AddrInUse));

    let mut syn = repr(5000, 80, TcpFlags::SYN, 100, None);
    syn.max_seg_size = Some(1000);
    syn.sack_permitted = true;
    harness.inject(&from_peer(syn, &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    let syn_ack = sent[0].0;
    assert!(syn_ack.flags.syn());
    assert_eq!(syn_ack.ack_number, Some(seq(101)));
    assert_eq!(syn_ack.max_seg_size, Some(1460));
    assert!(syn_ack.sack_permitted);

    // The backlog is full while the first handshake is pending.
    let mut second = syn;
    second.src_port = 5001;
    harness.inject(&from_peer(second, &[]));
    assert!(segments(&harness).is_empty());
    assert!(!listener.is_acceptable());

    let iss = syn_ack.seq_number.to_u32();
    let segment = repr(5000, 80, TcpFlags::default(), 101, Some(iss.wrapping_add(1)));
    harness.inject(&from_peer(segment, &[]));
    assert!(listener.is_acceptable());
    let mut stream = listener.accept().unwrap();
    assert_eq!(stream.state(), State::Established);
    assert_eq!(stream.peer_addr(), Some(Endpoint::new(PEER, 5000)));
    assert_eq!(stream.local_addr(), Some(Endpoint::new(HOST, 80)));

    let segment = repr(5000, 80, TcpFlags::default(), 101, Some(iss.wrapping_add(1)));
    harness.inject(&from_peer(segment, b"ping"));
    let mut buf = [0; 8];
    assert_eq!(stream.read(&mut buf), Ok(4));
    assert_eq!(&buf[..4], b"ping");

    // With the first connection accepted there is room again.
    harness.inject(&from_peer(second, &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.syn());
    assert_eq!(sent[0].0.dst_port, 5001);
}

#[test]
fn closing_listener_resets_pending_connections() {
    let harness = Harness::new();
    let mut listener = harness.stack.stream_socket();
    listener.bind(Endpoint::new(HOST, 80)).unwrap();
    listener.listen(4).unwrap();
    harness.inject(&from_peer(repr(5000, 80, TcpFlags::SYN, 100, None), &[]));
    let syn_ack = segments(&harness)[0].0;

    listener.close();
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.rst());
    assert_eq!(sent[0].0.seq_number, syn_ack.seq_number + 1);

    harness.inject(&from_peer(repr(5001, 80, TcpFlags::SYN, 100, None), &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.rst());
    assert_eq!(sent[0].0.ack_number, Some(seq(101)));
}

#[test]
fn closed_port_answers_with_reset() {
    let harness = Harness::new();
    harness.inject(&from_peer(repr(5000, 81, TcpFlags::SYN, 100, None), &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    let (reset, _) = sent[0];
    assert!(reset.flags.rst());
    assert_eq!((reset.src_port, reset.dst_port), (81, 5000));
    assert_eq!(reset.seq_number, seq(0));
    assert_eq!(reset.ack_number, Some(seq(101)));

    harness.inject(&from_peer(repr(5000, 81, TcpFlags::default(), 100, Some(7777)), b"x"));
    let (reset, _) = segments(&harness).remove(0);
    assert_eq!(reset.seq_number, seq(7777));
    assert_eq!(reset.ack_number, None);

    // A reset is never answered.
    harness.inject(&from_peer(repr(5000, 81, TcpFlags::RST, 100, None), &[]));
    assert!(segments(&harness).is_empty());
}

#[test]
fn reset_by_peer() {
    let harness = Harness::new();
    let (mut socket, port, _) = establish(&harness, |_| ());
    harness.inject(&from_peer(repr(80, port, TcpFlags::RST, 1001, None), &[]));
    assert_eq!(socket.state(), State::Closed);
    let mut buf = [0; 4];
    assert_eq!(socket.read(&mut buf), Err(Error::ConnectionReset));
    assert_eq!(socket.take_error(), Some(Error::ConnectionReset));
}

#[test]
fn out_of_window_reset_is_ignored() {
    let harness = Harness::new();
    let (socket, port, _) = establish(&harness, |_| ());
    harness.inject(&from_peer(repr(80, port, TcpFlags::RST, 900_000, None), &[]));
    assert_eq!(socket.state(), State::Established);
}

#[test]
fn syn_retransmission_backs_off_and_gives_up() {
    let harness = Harness::with_config(Config::default().max_backoff(3), 1500);
    let mut socket = harness.stack.stream_socket();
    socket.connect(Endpoint::new(PEER, 80)).unwrap();
    let iss = segments(&harness)[0].0.seq_number;

    // 3s, then 6s, then 12s.
    for &(wait, resent) in [(2_999, false), (1, true), (5_999, false), (1, true),
        (11_999, false), (1, true)].iter()
    {
        harness.advance(Duration::from_millis(wait));
        let sent = segments(&harness);
        assert_eq!(sent.len(), resent as usize);
        if resent {
            assert!(sent[0].0.flags.syn());
            assert_eq!(sent[0].0.seq_number, iss);
        }
    }

    harness.advance(Duration::from_secs(24));
    assert!(segments(&harness).is_empty());
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), Some(Error::TimedOut));
    assert!(socket.is_connectable());
}

#[test]
fn data_retransmission_doubles() {
    let harness = Harness::new();
    let (mut socket, _, nxt) = establish(&harness, |_| ());
    socket.write(b"lost").unwrap();
    assert_eq!(segments(&harness).len(), 1);

    // The handshake measured no delay, the timeout is the lower bound of one second.
    harness.advance(Duration::from_secs(1));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert_eq!(sent[0].1, b"lost");

    harness.advance(Duration::from_millis(1_999));
    assert!(segments(&harness).is_empty());
    harness.advance(Duration::from_millis(1));
    assert_eq!(segments(&harness).len(), 1);
}

#[test]
fn new_acknowledgment_clears_backoff() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |_| ());
    socket.write(b"one").unwrap();
    assert_eq!(segments(&harness).len(), 1);

    harness.advance(Duration::from_secs(1));
    assert_eq!(segments(&harness)[0].1, b"one");
    harness.advance(Duration::from_secs(2));
    assert_eq!(segments(&harness)[0].1, b"one");

    let ack = repr(80, port, TcpFlags::default(), 1001, Some(nxt.wrapping_add(3)));
    harness.inject(&from_peer(ack, &[]));
    assert!(segments(&harness).is_empty());

    // The next loss is timed from the estimate, not from the doubled timeout.
    socket.write(b"two").unwrap();
    assert_eq!(segments(&harness).len(), 1);
    harness.advance(Duration::from_millis(999));
    assert!(segments(&harness).is_empty());
    harness.advance(Duration::from_millis(1));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, seq(nxt.wrapping_add(3)));
    assert_eq!(sent[0].1, b"two");
}

#[test]
fn data_retransmission_gives_up() {
    let harness = Harness::with_config(Config::default().max_backoff(2), 1500);
    let (mut socket, _, _) = establish(&harness, |_| ());
    socket.write(b"lost").unwrap();
    assert_eq!(segments(&harness).len(), 1);

    // 1s, then 2s, then the third expiry exceeds the bound.
    harness.advance(Duration::from_secs(1));
    assert_eq!(segments(&harness).len(), 1);
    harness.advance(Duration::from_secs(2));
    assert_eq!(segments(&harness).len(), 1);
    harness.advance(Duration::from_millis(3_999));
    assert_eq!(socket.state(), State::Established);

    harness.advance(Duration::from_millis(1));
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), Some(Error::TimedOut));
}

#[test]
fn zero_window_is_probed() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |syn_ack| syn_ack.window_len = 0);
    assert_eq!(socket.write(b"data"), Ok(4));
    assert!(segments(&harness).is_empty());

    harness.advance(Duration::from_secs(1));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert_eq!(sent[0].1, b"d");

    harness.advance(Duration::from_millis(1_999));
    assert!(segments(&harness).is_empty());
    harness.advance(Duration::from_millis(1));
    assert_eq!(segments(&harness)[0].1, b"d");

    // The window opens and the data follows.
    harness.inject(&from_peer(repr(80, port, TcpFlags::default(), 1001, Some(nxt)), &[]));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert_eq!(sent[0].1, b"data");
}

#[test]
fn fast_retransmit_after_three_duplicates() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |syn_ack| syn_ack.max_seg_size = Some(100));
    assert_eq!(socket.write(&[0x55; 600]), Ok(600));

    // The initial window is two segments.
    let sent = segments(&harness);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].0.seq_number, seq(nxt.wrapping_add(100)));
    assert!(sent.iter().all(|(_, payload)| payload.len() == 100));

    let duplicate = from_peer(repr(80, port, TcpFlags::default(), 1001, Some(nxt)), &[]);
    // Limited transmit: one new segment for each of the first two duplicates.
    harness.inject(&duplicate);
    assert_eq!(segments(&harness)[0].0.seq_number, seq(nxt.wrapping_add(200)));
    harness.inject(&duplicate);
    assert_eq!(segments(&harness)[0].0.seq_number, seq(nxt.wrapping_add(300)));

    harness.inject(&duplicate);
    let sent = segments(&harness);
    assert!(!sent.is_empty());
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert_eq!(sent[0].1.len(), 100);
}

#[test]
fn out_of_order_data_is_selectively_acknowledged() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |syn_ack| syn_ack.sack_permitted = true);

    harness.inject(&from_peer(repr(80, port, TcpFlags::default(), 1006, Some(nxt)), b"world"));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(seq(1001)));
    assert_eq!(sent[0].0.sack_ranges[0], Some((1006, 1011)));
    let mut buf = [0; 16];
    assert_eq!(socket.read(&mut buf), Err(Error::WouldBlock));

    harness.inject(&from_peer(repr(80, port, TcpFlags::default(), 1001, Some(nxt)), b"hello"));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(seq(1011)));
    assert_eq!(sent[0].0.sack_ranges[0], None);
    assert_eq!(socket.read(&mut buf), Ok(10));
    assert_eq!(&buf[..10], b"helloworld");
}

#[test]
fn data_after_input_shutdown_resets() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |_| ());
    socket.shutdown_input().unwrap();
    let mut buf = [0; 4];
    assert_eq!(socket.read(&mut buf), Ok(0));

    harness.inject(&from_peer(repr(80, port, TcpFlags::default(), 1001, Some(nxt)), b"late"));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.rst());
    assert_eq!(sent[0].0.seq_number, seq(nxt));
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), Some(Error::ConnectionAborted));
}

#[test]
fn urgent_data_is_marked() {
    let harness = Harness::new();
    let (mut socket, port, nxt) = establish(&harness, |_| ());
    assert_eq!(socket.write_urgent(b"!!"), Ok(2));
    let sent = segments(&harness);
    assert!(sent[0].0.flags.urg());
    assert_eq!(sent[0].0.urgent_at, 2);

    let mut urgent = repr(80, port, TcpFlags::default(), 1001, Some(nxt.wrapping_add(2)));
    urgent.urgent_at = 3;
    harness.inject(&from_peer(urgent, b"abcdef"));
    assert_eq!(socket.urgent_pending(), 3);
    let mut buf = [0; 8];
    assert_eq!(socket.read(&mut buf), Ok(6));
    assert_eq!(socket.urgent_pending(), 0);
}

fn report(sent: &[u8], reason: Icmpv4DstUnreachable, next_hop_mtu: u16) -> Vec<u8> {
    let quote = &sent[..IPV4_HEADER_LEN + 8];
    let report = Icmpv4Repr::DstUnreachable {
        reason,
        next_hop_mtu,
        header: parse(sent).0,
        data_len: quote.len(),
    };
    datagram(PEER, HOST, IpProtocol::Icmp, &icmp(report, quote))
}

#[test]
fn port_unreachable_refuses_connection() {
    let harness = Harness::new();
    let mut socket = harness.stack.stream_socket();
    socket.connect(Endpoint::new(PEER, 80)).unwrap();
    let syn = harness.sent().remove(0);

    harness.inject(&report(&syn, Icmpv4DstUnreachable::PortUnreachable, 0));
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(socket.take_error(), Some(Error::ConnectionRefused));
}

#[test]
fn soft_error_is_reported_once() {
    let harness = Harness::new();
    let mut socket = harness.stack.stream_socket();
    socket.connect(Endpoint::new(PEER, 80)).unwrap();
    let syn = harness.sent().remove(0);

    harness.inject(&report(&syn, Icmpv4DstUnreachable::HostUnreachable, 0));
    assert_eq!(socket.state(), State::SynSent);
    assert_eq!(socket.take_error(), Some(Error::Unreachable));
    assert_eq!(socket.take_error(), None);
}

#[test]
fn fragmentation_needed_lowers_segment_size() {
    let harness = Harness::new();
    let (mut socket, _, nxt) = establish(&harness, |_| ());
    assert_eq!(socket.write(&[0xaa; 1000]), Ok(1000));
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode(&sent[0]).1.len(), 1000);

    harness.inject(&report(&sent[0], Icmpv4DstUnreachable::FragRequired, 576));
    let resent = segments(&harness);
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].0.seq_number, seq(nxt));
    assert_eq!(resent[0].1.len(), 536);
}

#[test]
fn acknowledgment_on_closed_window_is_processed() {
    let harness = Harness::with_config(Config::default().recv_buffer(16), 1500);
    let (mut socket, port, nxt) = establish(&harness, |_| ());

    let fill = repr(80, port, TcpFlags::default(), 1001, Some(nxt));
    harness.inject(&from_peer(fill, b"0123456789abcdef"));
    harness.advance(Duration::from_millis(200));
    let sent = segments(&harness);
    assert_eq!(sent.last().map(|(ack, _)| (ack.ack_number, ack.window_len)),
        Some((Some(seq(1017)), 0)));

    assert_eq!(socket.write(b"abc"), Ok(3));
    assert_eq!(segments(&harness)[0].1, b"abc");

    // The peer probes our window and acknowledges the data with the probe.
    let probe = repr(80, port, TcpFlags::default(), 1017, Some(nxt.wrapping_add(3)));
    harness.inject(&from_peer(probe, b"x"));
    let sent = segments(&harness);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(seq(1017)));
    assert_eq!(sent[0].0.window_len, 0);
    assert!(sent[0].1.is_empty());

    harness.advance(Duration::from_secs(4));
    assert!(segments(&harness).iter().all(|(_, payload)| payload.is_empty()));
    let mut buf = [0; 32];
    assert_eq!(socket.read(&mut buf), Ok(16));
}
