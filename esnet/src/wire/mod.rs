/*! Low-level packet access and construction.

# Packet representations

The `wire` module deals with the byte layout of every header the stack speaks. It provides two
levels of functionality.

 * The lowercase structures, e.g. [`ipv4_packet`] or [`tcp_packet`], are dynamically sized views
   over a byte slice. They extract fields from sequences of octets and insert fields into them.
   These are what the layers use on the buffer of a [`Messenger`] while it moves through the
   conduit graph.
 * The `Repr` family, e.g. [`Ipv4Repr`] or [`TcpRepr`], is a compact, high-level representation
   of header data that can be parsed from and emitted into a view.

[`ipv4_packet`]: struct.ipv4_packet.html
[`tcp_packet`]: struct.tcp_packet.html
[`Ipv4Repr`]: struct.Ipv4Repr.html
[`TcpRepr`]: struct.TcpRepr.html
[`Messenger`]: ../messenger/struct.Messenger.html

A view guarantees that no field accessor or setter panics once its `check_len()` method returned
`Ok(())`, as long as only the fields listed as length-preserving are mutated. `new_checked` is the
shorthand for `new_unchecked` followed by `check_len`; untrusted input must go through it.

`Repr::parse` never panics. `Repr::emit` never panics when the target view is at least
`Repr::buffer_len()` octets long.

# Examples

Emit an IPv4 header into a buffer and parse it back:

```rust
use esnet::wire::*;
let repr = Ipv4Repr {
    src_addr:    Ipv4Address::new(10, 0, 0, 1),
    dst_addr:    Ipv4Address::new(10, 0, 0, 2),
    protocol:    IpProtocol::Tcp,
    payload_len: 10,
    hop_limit:   64,
    ident:       7,
    dont_frag:   false,
    more_frags:  false,
    frag_offset: 0,
};
let mut buffer = vec![0; repr.buffer_len() + repr.payload_len];
repr.emit(ipv4_packet::new_unchecked_mut(&mut buffer), Checksum::Manual);
let packet = ipv4_packet::new_checked(&buffer).expect("truncated packet");
let parsed = Ipv4Repr::parse(packet, Checksum::Manual).expect("malformed packet");
assert_eq!(repr, parsed);
```
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// The header views follow the layout of `smoltcp`, originally distributed under 0-clause BSD.

// Field accessors are named after the RFC fields they read.
#![allow(missing_docs)]

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
}

mod error;
pub(crate) mod ip;
mod ipv4;
mod icmpv4;
mod udp;
mod tcp;

/// Describes how to handle checksums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Checksum must be computed or checked by the stack.
    Manual,

    /// The checksum is neither filled nor verified.
    ///
    /// Only meaningful for loopback links and tests where corruption can not occur.
    Ignored,
}

impl Checksum {
    /// Whether the stack is responsible for the checksum.
    pub fn manual(self) -> bool {
        match self {
            Checksum::Manual => true,
            Checksum::Ignored => false,
        }
    }
}

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Protocol as IpProtocol,
    checksum as ip_checksum};

pub use self::ipv4::{
    ipv4 as ipv4_packet,
    Address as Ipv4Address,
    Cidr as Ipv4Cidr,
    Repr as Ipv4Repr,
    HEADER_LEN as IPV4_HEADER_LEN,
    MAX_DATAGRAM as IPV4_MAX_DATAGRAM,
    MIN_MTU as IPV4_MIN_MTU};

pub use self::icmpv4::{
    icmpv4 as icmpv4_packet,
    Message as Icmpv4Message,
    DstUnreachable as Icmpv4DstUnreachable,
    TimeExceeded as Icmpv4TimeExceeded,
    Repr as Icmpv4Repr,
    HEADER_LEN as ICMPV4_HEADER_LEN,
    ORIGINAL_DATA_LEN as ICMPV4_ORIGINAL_DATA_LEN};

pub use self::udp::{
    udp as udp_packet,
    Repr as UdpRepr,
    HEADER_LEN as UDP_HEADER_LEN};

pub use self::tcp::{
    tcp as tcp_packet,
    SeqNumber as TcpSeqNumber,
    TcpOption,
    Repr as TcpRepr,
    Flags as TcpFlags,
    SackBlocks as TcpSackBlocks,
    HEADER_LEN as TCP_HEADER_LEN};
